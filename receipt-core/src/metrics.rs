//! Named counters/gauges/histograms surfaced to the metrics sink,
//! grounded on the project's prometheus registration pattern
//! (`Counter::new(name, help)?` then `registry.register(...)`).

use anyhow::Result;
use prometheus::{Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry};

pub struct Metrics {
    pub receipts_to_collect: GaugeVec,
    pub receipts_failed: Counter,
    pub vouchers_to_exchange: GaugeVec,
    pub receipts_exchange_duration: HistogramVec,
    pub vouchers: Counter,
    pub voucher_exchanges_ok: Counter,
    pub voucher_exchanges_invalid: Counter,
    pub voucher_redeems_failed: Counter,
    pub vouchers_redeem_duration: Histogram,
    pub vouchers_redeem: Gauge,
    pub voucher_collected_fees: GaugeVec,
}

impl Metrics {
    pub fn register(registry: &Registry) -> Result<Self> {
        let receipts_to_collect = GaugeVec::new(
            Opts::new("receipts_to_collect", "Receipts pending collection"),
            &["allocation"],
        )?;
        let receipts_failed =
            Counter::new("receipts_failed", "Gateway exchanges that failed")?;
        let vouchers_to_exchange = GaugeVec::new(
            Opts::new("vouchers_to_exchange", "Partial vouchers pending aggregation"),
            &["allocation"],
        )?;
        let receipts_exchange_duration = HistogramVec::new(
            HistogramOpts::new("receipts_exchange_duration", "Gateway exchange duration, seconds"),
            &["allocation"],
        )?;
        let vouchers = Counter::new("vouchers", "Vouchers persisted after gateway exchange")?;
        let voucher_exchanges_ok =
            Counter::new("voucher_exchanges_ok", "Successful on-chain redemptions")?;
        let voucher_exchanges_invalid = Counter::new(
            "voucher_exchanges_invalid",
            "Redemptions rejected by a paused/unauthorized sentinel",
        )?;
        let voucher_redeems_failed =
            Counter::new("voucher_redeems_failed", "Redemptions that threw an error")?;
        let vouchers_redeem_duration = Histogram::with_opts(HistogramOpts::new(
            "vouchers_redeem_duration",
            "On-chain redemption duration, seconds",
        ))?;
        let vouchers_redeem = Gauge::new("vouchers_redeem", "Vouchers submitted in the last batch")?;
        let voucher_collected_fees = GaugeVec::new(
            Opts::new("voucher_collected_fees", "Cumulative collected fees per allocation"),
            &["allocation"],
        )?;

        registry.register(Box::new(receipts_to_collect.clone()))?;
        registry.register(Box::new(receipts_failed.clone()))?;
        registry.register(Box::new(vouchers_to_exchange.clone()))?;
        registry.register(Box::new(receipts_exchange_duration.clone()))?;
        registry.register(Box::new(vouchers.clone()))?;
        registry.register(Box::new(voucher_exchanges_ok.clone()))?;
        registry.register(Box::new(voucher_exchanges_invalid.clone()))?;
        registry.register(Box::new(voucher_redeems_failed.clone()))?;
        registry.register(Box::new(vouchers_redeem_duration.clone()))?;
        registry.register(Box::new(vouchers_redeem.clone()))?;
        registry.register(Box::new(voucher_collected_fees.clone()))?;

        Ok(Self {
            receipts_to_collect,
            receipts_failed,
            vouchers_to_exchange,
            receipts_exchange_duration,
            vouchers,
            voucher_exchanges_ok,
            voucher_exchanges_invalid,
            voucher_redeems_failed,
            vouchers_redeem_duration,
            vouchers_redeem,
            voucher_collected_fees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_duplicate_name_conflicts() {
        let registry = Registry::new();
        let metrics = Metrics::register(&registry).unwrap();
        metrics.receipts_failed.inc();
        assert_eq!(metrics.receipts_failed.get(), 1.0);
    }
}
