use std::collections::{BTreeMap, VecDeque};

use tracing::{info, warn};

use crate::command::{TradeEvent, TradeSide};
use crate::panel::Account;
use crate::series::format_price;

const MAX_ACTIVITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub quantity: u32,
    pub cost: f64,
}

impl Position {
    pub fn average_price(&self) -> f64 {
        if self.quantity == 0 {
            0.0
        } else {
            self.cost / self.quantity as f64
        }
    }
}

/// In-memory wallet used by the simulator in place of a real brokerage.
#[derive(Debug, Clone)]
pub struct PaperAccount {
    cash: f64,
    positions: BTreeMap<String, Position>,
    activity: VecDeque<TradeEvent>,
    pending: Vec<TradeEvent>,
    realized_pnl: f64,
}

impl PaperAccount {
    pub fn new(starting_cash: f64) -> Self {
        PaperAccount {
            cash: starting_cash.max(0.0),
            positions: BTreeMap::new(),
            activity: VecDeque::with_capacity(MAX_ACTIVITY),
            pending: Vec::new(),
            realized_pnl: 0.0,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn positions(&self) -> impl Iterator<Item = (&str, &Position)> {
        self.positions.iter().map(|(market, pos)| (market.as_str(), pos))
    }

    pub fn position(&self, market: &str) -> Option<&Position> {
        self.positions.get(market)
    }

    pub fn activity(&self) -> impl Iterator<Item = &TradeEvent> {
        self.activity.iter()
    }

    /// Events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<TradeEvent> {
        std::mem::take(&mut self.pending)
    }

    fn record(&mut self, event: TradeEvent) {
        if event.success {
            info!(
                market = %event.market,
                side = event.side.label(),
                price = event.price,
                quantity = event.quantity,
                "{}",
                event.message
            );
        } else {
            warn!(
                market = %event.market,
                side = event.side.label(),
                "{}",
                event.message
            );
        }
        if self.activity.len() == MAX_ACTIVITY {
            self.activity.pop_front();
        }
        self.activity.push_back(event.clone());
        self.pending.push(event);
    }
}

impl Account for PaperAccount {
    fn can_afford(&self, price: f64, quantity: u32) -> bool {
        quantity > 0 && price.is_finite() && price >= 0.0 && price * quantity as f64 <= self.cash
    }

    fn has_position(&self, market: &str) -> bool {
        self.positions
            .get(market)
            .is_some_and(|position| position.quantity > 0)
    }

    fn buy(&mut self, market: &str, price: f64, quantity: u32) {
        if !self.can_afford(price, quantity) {
            let message = format!(
                "{market}: cannot buy {quantity} @ {} with {} available",
                format_price(price),
                format_price(self.cash)
            );
            self.record(TradeEvent::new(
                market,
                TradeSide::Buy,
                price,
                quantity,
                false,
                message,
            ));
            return;
        }
        let held = self.position(market).map_or(0, |position| position.quantity);
        let Some(total) = held.checked_add(quantity) else {
            let message = format!("{market}: position limit reached, cannot add {quantity}");
            self.record(TradeEvent::new(
                market,
                TradeSide::Buy,
                price,
                quantity,
                false,
                message,
            ));
            return;
        };
        let cost = price * quantity as f64;
        self.cash -= cost;
        let position = self.positions.entry(market.to_string()).or_insert(Position {
            quantity: 0,
            cost: 0.0,
        });
        position.quantity = total;
        position.cost += cost;
        let message = format!("{market}: bought {quantity} @ {}", format_price(price));
        self.record(TradeEvent::new(
            market,
            TradeSide::Buy,
            price,
            quantity,
            true,
            message,
        ));
    }

    fn sell_all(&mut self, market: &str, price: f64) {
        let Some(position) = self
            .positions
            .remove(market)
            .filter(|position| position.quantity > 0)
        else {
            let message = format!("{market}: nothing to sell");
            self.record(TradeEvent::new(market, TradeSide::Sell, price, 0, false, message));
            return;
        };
        let proceeds = price * position.quantity as f64;
        let pnl = proceeds - position.cost;
        self.cash += proceeds;
        self.realized_pnl += pnl;
        let message = format!(
            "{market}: sold {} @ {} (P&L {:+.2})",
            position.quantity,
            format_price(price),
            pnl
        );
        self.record(TradeEvent::new(
            market,
            TradeSide::Sell,
            price,
            position.quantity,
            true,
            message,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affordability_needs_quantity_and_cash() {
        let account = PaperAccount::new(100.0);
        assert!(account.can_afford(10.0, 10));
        assert!(!account.can_afford(10.0, 11));
        assert!(!account.can_afford(10.0, 0));
        assert!(!account.can_afford(f64::NAN, 1));
    }

    #[test]
    fn buy_moves_cash_into_position() {
        let mut account = PaperAccount::new(100.0);
        account.buy("GOLD", 4.0, 5);
        account.buy("GOLD", 6.0, 5);
        assert!((account.cash() - 50.0).abs() < 1e-9);
        let position = account.position("GOLD").copied().unwrap();
        assert_eq!(position.quantity, 10);
        assert!((position.average_price() - 5.0).abs() < 1e-9);
        assert!(account.has_position("GOLD"));
        assert!(!account.has_position("SILVER"));
        assert_eq!(account.drain_events().len(), 2);
        assert!(account.drain_events().is_empty());
    }

    #[test]
    fn unaffordable_buy_is_rejected() {
        let mut account = PaperAccount::new(10.0);
        account.buy("GOLD", 6.0, 2);
        assert_eq!(account.cash(), 10.0);
        assert!(!account.has_position("GOLD"));
        let events = account.drain_events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
    }

    #[test]
    fn oversized_position_is_rejected_instead_of_wrapping() {
        let mut account = PaperAccount::new(0.0);
        for _ in 0..5 {
            account.buy("ALPHA", 0.0, 999_999_999);
        }
        let position = account.position("ALPHA").copied().unwrap();
        assert_eq!(position.quantity, 3_999_999_996);
        let events = account.drain_events();
        assert_eq!(events.len(), 5);
        assert!(events[..4].iter().all(|event| event.success));
        assert!(!events[4].success);
    }

    #[test]
    fn sell_all_closes_position_and_books_pnl() {
        let mut account = PaperAccount::new(100.0);
        account.buy("GOLD", 5.0, 4);
        account.sell_all("GOLD", 7.5);
        assert!((account.cash() - 110.0).abs() < 1e-9);
        assert!((account.realized_pnl() - 10.0).abs() < 1e-9);
        assert!(!account.has_position("GOLD"));
        assert_eq!(account.positions().count(), 0);
    }

    #[test]
    fn selling_without_position_is_rejected() {
        let mut account = PaperAccount::new(100.0);
        account.sell_all("GOLD", 5.0);
        assert_eq!(account.cash(), 100.0);
        let events = account.drain_events();
        assert!(!events[0].success);
        assert_eq!(events[0].side, TradeSide::Sell);
    }

    #[test]
    fn activity_is_bounded() {
        let mut account = PaperAccount::new(0.0);
        for _ in 0..(MAX_ACTIVITY + 25) {
            account.sell_all("GOLD", 1.0);
        }
        assert_eq!(account.activity().count(), MAX_ACTIVITY);
    }
}
