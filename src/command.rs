use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn label(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// Outcome of one account operation, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub timestamp: DateTime<Local>,
    pub market: String,
    pub side: TradeSide,
    pub price: f64,
    pub quantity: u32,
    pub success: bool,
    pub message: String,
}

impl TradeEvent {
    pub fn new(
        market: &str,
        side: TradeSide,
        price: f64,
        quantity: u32,
        success: bool,
        message: impl Into<String>,
    ) -> Self {
        TradeEvent {
            timestamp: Local::now(),
            market: market.to_string(),
            side,
            price,
            quantity,
            success,
            message: message.into(),
        }
    }

    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}

/// What a key press asks the selected market panel to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    Buy,
    Sell,
    ToggleWidgets,
    QuantityInput(char),
    QuantityBackspace,
    SelectMarket(isize),
}
