// =============================================================================
// Paper Broker — deterministic local order simulation
// =============================================================================
//
// Simulates the broker surface with instant fills at the hinted (or last
// known) price. A `fill_fraction` knob below 1.0 produces partial fills so
// the gateway's reconciliation path (cancel-below-90 %) can be exercised
// without a live counterparty.
//
// The paper broker also carries an injectable bar store so the market-data
// provider can run against it in paper and backtest modes.
// =============================================================================

use std::collections::HashMap;

use anyhow::{bail, Result};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::gateway::{
    BrokerPosition, Instrument, OrderRequest, OrderStatus, OrderStatusReport, Quote,
};
use crate::market_data::Bar;
use crate::types::Side;

struct PaperOrder {
    request: OrderRequest,
    filled_qty: u32,
    avg_price: f64,
    status: OrderStatus,
}

/// In-memory broker with deterministic fills.
pub struct PaperBroker {
    prices: RwLock<HashMap<String, f64>>,
    orders: RwLock<HashMap<String, PaperOrder>>,
    bars: RwLock<HashMap<(String, String), Vec<Bar>>>,
    /// Fraction of requested quantity filled per order (1.0 = full fill).
    fill_fraction: f64,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::with_fill_fraction(1.0)
    }

    pub fn with_fill_fraction(fill_fraction: f64) -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            bars: RwLock::new(HashMap::new()),
            fill_fraction: fill_fraction.clamp(0.0, 1.0),
        }
    }

    /// Seed or update the simulated last price for a symbol.
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.write().insert(symbol.to_string(), price);
    }

    /// Seed historical bars served by [`historical_bars`].
    pub fn push_bars(&self, symbol: &str, interval: &str, bars: Vec<Bar>) {
        self.bars
            .write()
            .insert((symbol.to_string(), interval.to_string()), bars);
    }

    pub fn place_order(&self, request: &OrderRequest) -> Result<String> {
        let price = match request.price {
            Some(p) if p > 0.0 => p,
            _ => match self.prices.read().get(&request.symbol) {
                Some(&p) => p,
                None => bail!("paper broker has no price for {}", request.symbol),
            },
        };

        let filled_qty = ((request.qty as f64) * self.fill_fraction).floor() as u32;
        let status = if filled_qty == request.qty {
            OrderStatus::Complete
        } else if filled_qty > 0 {
            OrderStatus::Partial
        } else {
            OrderStatus::Rejected
        };

        let order_id = Uuid::new_v4().to_string();
        info!(
            order_id = %order_id,
            symbol = %request.symbol,
            side = %request.side,
            qty = request.qty,
            filled_qty,
            price,
            status = ?status,
            "paper fill"
        );

        self.orders.write().insert(
            order_id.clone(),
            PaperOrder {
                request: request.clone(),
                filled_qty,
                avg_price: price,
                status,
            },
        );
        Ok(order_id)
    }

    pub fn order_status(&self, order_id: &str) -> Result<OrderStatusReport> {
        let orders = self.orders.read();
        let order = match orders.get(order_id) {
            Some(o) => o,
            None => bail!("unknown paper order {order_id}"),
        };
        Ok(OrderStatusReport {
            status: order.status,
            filled_qty: order.filled_qty,
            avg_price: order.avg_price,
            rejection_reason: matches!(order.status, OrderStatus::Rejected)
                .then(|| "zero fill under paper fill fraction".to_string()),
        })
    }

    pub fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut orders = self.orders.write();
        match orders.get_mut(order_id) {
            Some(order) => {
                if !matches!(order.status, OrderStatus::Complete) {
                    order.status = OrderStatus::Cancelled;
                }
                debug!(order_id, "paper order cancelled");
                Ok(())
            }
            None => bail!("unknown paper order {order_id}"),
        }
    }

    /// Net filled quantity per symbol across all paper orders.
    pub fn positions(&self) -> Vec<BrokerPosition> {
        let orders = self.orders.read();
        let mut net: HashMap<String, (i64, f64)> = HashMap::new();
        for order in orders.values() {
            if order.filled_qty == 0 {
                continue;
            }
            let signed = match order.request.side {
                Side::Buy => order.filled_qty as i64,
                Side::Sell => -(order.filled_qty as i64),
            };
            let entry = net.entry(order.request.symbol.clone()).or_insert((0, 0.0));
            entry.0 += signed;
            entry.1 = order.avg_price;
        }
        net.into_iter()
            .filter(|(_, (qty, _))| *qty != 0)
            .map(|(symbol, (qty, avg_price))| BrokerPosition {
                symbol,
                qty,
                avg_price,
            })
            .collect()
    }

    pub fn get_quote(&self, symbol: &str) -> Result<Quote> {
        match self.prices.read().get(symbol) {
            Some(&last) => Ok(Quote {
                last,
                bid: last * 0.9995,
                ask: last * 1.0005,
            }),
            None => bail!("paper broker has no quote for {symbol}"),
        }
    }

    pub fn historical_bars(&self, symbol: &str, interval: &str) -> Result<Vec<Bar>> {
        match self
            .bars
            .read()
            .get(&(symbol.to_string(), interval.to_string()))
        {
            Some(bars) => Ok(bars.clone()),
            None => Ok(Vec::new()),
        }
    }

    pub fn instruments(&self, _exchange: &str) -> Vec<Instrument> {
        Vec::new()
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PaperBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperBroker")
            .field("orders", &self.orders.read().len())
            .field("fill_fraction", &self.fill_fraction)
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{OrderType, ProductType};

    fn request(symbol: &str, qty: u32, side: Side, price: Option<f64>) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            exchange: "NSE".to_string(),
            qty,
            side,
            price,
            order_type: OrderType::Limit,
            product: ProductType::Mis,
        }
    }

    #[test]
    fn full_fill_at_hinted_price() {
        let broker = PaperBroker::new();
        let id = broker
            .place_order(&request("TCS", 10, Side::Buy, Some(3500.0)))
            .unwrap();
        let status = broker.order_status(&id).unwrap();
        assert_eq!(status.status, OrderStatus::Complete);
        assert_eq!(status.filled_qty, 10);
        assert!((status.avg_price - 3500.0).abs() < 1e-10);
    }

    #[test]
    fn falls_back_to_price_book() {
        let broker = PaperBroker::new();
        broker.set_price("TCS", 3400.0);
        let id = broker
            .place_order(&request("TCS", 5, Side::Buy, None))
            .unwrap();
        let status = broker.order_status(&id).unwrap();
        assert!((status.avg_price - 3400.0).abs() < 1e-10);
    }

    #[test]
    fn no_price_anywhere_is_an_error() {
        let broker = PaperBroker::new();
        assert!(broker
            .place_order(&request("TCS", 5, Side::Buy, None))
            .is_err());
    }

    #[test]
    fn partial_fill_fraction() {
        let broker = PaperBroker::with_fill_fraction(0.7);
        let id = broker
            .place_order(&request("TCS", 100, Side::Buy, Some(100.0)))
            .unwrap();
        let status = broker.order_status(&id).unwrap();
        assert_eq!(status.status, OrderStatus::Partial);
        assert_eq!(status.filled_qty, 70);
    }

    #[test]
    fn cancel_leaves_complete_orders_alone() {
        let broker = PaperBroker::new();
        let id = broker
            .place_order(&request("TCS", 10, Side::Buy, Some(100.0)))
            .unwrap();
        broker.cancel_order(&id).unwrap();
        assert_eq!(
            broker.order_status(&id).unwrap().status,
            OrderStatus::Complete
        );
    }

    #[test]
    fn positions_net_across_orders() {
        let broker = PaperBroker::new();
        broker
            .place_order(&request("TCS", 10, Side::Buy, Some(100.0)))
            .unwrap();
        broker
            .place_order(&request("TCS", 4, Side::Sell, Some(110.0)))
            .unwrap();
        let positions = broker.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].qty, 6);
    }

    #[test]
    fn quote_wraps_last_price() {
        let broker = PaperBroker::new();
        broker.set_price("TCS", 1000.0);
        let quote = broker.get_quote("TCS").unwrap();
        assert!((quote.last - 1000.0).abs() < 1e-10);
        assert!(quote.bid < quote.last && quote.ask > quote.last);
    }

    #[test]
    fn bars_store_roundtrip() {
        let broker = PaperBroker::new();
        let bars = vec![Bar {
            timestamp: 1,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        }];
        broker.push_bars("TCS", "5minute", bars.clone());
        assert_eq!(broker.historical_bars("TCS", "5minute").unwrap(), bars);
        assert!(broker.historical_bars("TCS", "day").unwrap().is_empty());
    }
}
