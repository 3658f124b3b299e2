use std::cell::RefCell;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::{info, warn};

use crate::series::{PriceSource, format_price};

pub type Shared<T> = Rc<RefCell<T>>;

pub trait TextSink {
    fn is_alive(&self) -> bool;
    fn set_text(&mut self, text: String);
}

pub trait ControlSink {
    fn is_alive(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);
}

pub trait QuantitySource {
    fn is_alive(&self) -> bool;
    fn raw_text(&self) -> String;
}

/// Wallet and positions the panel trades against.
pub trait Account {
    fn can_afford(&self, price: f64, quantity: u32) -> bool;
    fn has_position(&self, market: &str) -> bool;
    fn buy(&mut self, market: &str, price: f64, quantity: u32);
    fn sell_all(&mut self, market: &str, price: f64);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PanelError {
    #[error("{0} widget was destroyed")]
    Destroyed(&'static str),

    #[error("{0} widget is already borrowed")]
    Busy(&'static str),
}

/// Buy/sell panel for one market, refreshed once per UI frame.
pub struct TradingPanelController {
    market_name: String,
    series: Option<Shared<dyn PriceSource>>,
    account: Option<Shared<dyn Account>>,
    price_display: Option<Weak<RefCell<dyn TextSink>>>,
    quantity_input: Option<Weak<RefCell<dyn QuantitySource>>>,
    buy_control: Option<Weak<RefCell<dyn ControlSink>>>,
    sell_control: Option<Weak<RefCell<dyn ControlSink>>>,
    last_quantity: u32,
}

impl TradingPanelController {
    pub fn new(market_name: impl Into<String>) -> Self {
        TradingPanelController {
            market_name: market_name.into(),
            series: None,
            account: None,
            price_display: None,
            quantity_input: None,
            buy_control: None,
            sell_control: None,
            last_quantity: 0,
        }
    }

    pub fn with_series(mut self, series: Shared<dyn PriceSource>) -> Self {
        self.series = Some(series);
        self
    }

    pub fn with_account(mut self, account: Shared<dyn Account>) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_price_display<T: TextSink + 'static>(mut self, display: Weak<RefCell<T>>) -> Self {
        let display: Weak<RefCell<dyn TextSink>> = display;
        self.price_display = Some(display);
        self
    }

    pub fn with_quantity_input<T: QuantitySource + 'static>(
        mut self,
        input: Weak<RefCell<T>>,
    ) -> Self {
        let input: Weak<RefCell<dyn QuantitySource>> = input;
        self.quantity_input = Some(input);
        self
    }

    pub fn with_buy_control<T: ControlSink + 'static>(mut self, control: Weak<RefCell<T>>) -> Self {
        let control: Weak<RefCell<dyn ControlSink>> = control;
        self.buy_control = Some(control);
        self
    }

    pub fn with_sell_control<T: ControlSink + 'static>(
        mut self,
        control: Weak<RefCell<T>>,
    ) -> Self {
        let control: Weak<RefCell<dyn ControlSink>> = control;
        self.sell_control = Some(control);
        self
    }

    pub fn last_quantity(&self) -> u32 {
        self.last_quantity
    }

    /// Projects series and account state onto the panel widgets.
    ///
    /// Returns how many widget updates were skipped because a widget was
    /// gone; each skip is logged and retried naturally on the next frame.
    pub fn refresh_tick(&mut self) -> usize {
        let outcomes = [
            self.refresh_price_display(),
            self.refresh_buy_control(),
            self.refresh_sell_control(),
        ];
        let mut skipped = 0;
        for err in outcomes.into_iter().filter_map(Result::err) {
            warn!(market = %self.market_name, %err, "stale UI reference, update skipped");
            skipped += 1;
        }
        skipped
    }

    fn refresh_price_display(&self) -> Result<(), PanelError> {
        let (Some(series), Some(display)) = (&self.series, &self.price_display) else {
            return Ok(());
        };
        let price = read(series, "series", |series| series.current_value())?;
        let display = live(display, "price display", |sink| sink.is_alive())?;
        let mut sink = display
            .try_borrow_mut()
            .map_err(|_| PanelError::Busy("price display"))?;
        sink.set_text(format_price(price));
        Ok(())
    }

    fn refresh_buy_control(&mut self) -> Result<(), PanelError> {
        let (Some(control), Some(account), Some(series), Some(input)) = (
            self.buy_control.clone(),
            self.account.clone(),
            self.series.clone(),
            self.quantity_input.clone(),
        ) else {
            return Ok(());
        };
        let input = live(&input, "quantity input", |source| source.is_alive())?;
        let raw = input
            .try_borrow()
            .map_err(|_| PanelError::Busy("quantity input"))?
            .raw_text();
        let quantity = parse_quantity(Some(&raw));
        self.last_quantity = quantity;

        let price = read(&series, "series", |series| series.current_value())?;
        let affordable = read(&account, "account", |account| {
            account.can_afford(price, quantity)
        })?;
        let control = live(&control, "buy button", |sink| sink.is_alive())?;
        control
            .try_borrow_mut()
            .map_err(|_| PanelError::Busy("buy button"))?
            .set_enabled(affordable);
        Ok(())
    }

    fn refresh_sell_control(&self) -> Result<(), PanelError> {
        let (Some(control), Some(account)) = (&self.sell_control, &self.account) else {
            return Ok(());
        };
        let holding = read(account, "account", |account| {
            account.has_position(&self.market_name)
        })?;
        let control = live(control, "sell button", |sink| sink.is_alive())?;
        control
            .try_borrow_mut()
            .map_err(|_| PanelError::Busy("sell button"))?
            .set_enabled(holding);
        Ok(())
    }

    /// Forwards a buy at the current price. Affordability is left to the account.
    pub fn execute_buy(&mut self) -> bool {
        let (Some(account), Some(series)) = (self.account.clone(), self.series.clone()) else {
            return false;
        };
        let quantity = self.current_quantity();
        self.last_quantity = quantity;
        let price = match read(&series, "series", |series| series.current_value()) {
            Ok(price) => price,
            Err(err) => return self.skip_trade("buy", err),
        };
        let Ok(mut account) = account.try_borrow_mut() else {
            return self.skip_trade("buy", PanelError::Busy("account"));
        };
        info!(market = %self.market_name, price, quantity, "buy requested");
        account.buy(&self.market_name, price, quantity);
        true
    }

    pub fn execute_sell(&mut self) -> bool {
        let (Some(account), Some(series)) = (&self.account, &self.series) else {
            return false;
        };
        let price = match read(series, "series", |series| series.current_value()) {
            Ok(price) => price,
            Err(err) => return self.skip_trade("sell", err),
        };
        let Ok(mut account) = account.try_borrow_mut() else {
            return self.skip_trade("sell", PanelError::Busy("account"));
        };
        info!(market = %self.market_name, price, "sell all requested");
        account.sell_all(&self.market_name, price);
        true
    }

    fn skip_trade(&self, action: &str, err: PanelError) -> bool {
        warn!(market = %self.market_name, action, %err, "trade request dropped");
        false
    }

    fn current_quantity(&self) -> u32 {
        let raw = self
            .quantity_input
            .as_ref()
            .and_then(Weak::upgrade)
            .and_then(|handle| {
                let source = handle.try_borrow().ok()?;
                source.is_alive().then(|| source.raw_text())
            });
        parse_quantity(raw.as_deref())
    }
}

fn read<T: ?Sized, V>(
    handle: &Shared<T>,
    name: &'static str,
    op: impl FnOnce(&T) -> V,
) -> Result<V, PanelError> {
    let inner = handle.try_borrow().map_err(|_| PanelError::Busy(name))?;
    Ok(op(&inner))
}

fn live<T: ?Sized>(
    handle: &Weak<RefCell<T>>,
    widget: &'static str,
    is_alive: impl FnOnce(&T) -> bool,
) -> Result<Rc<RefCell<T>>, PanelError> {
    let strong = handle.upgrade().ok_or(PanelError::Destroyed(widget))?;
    let alive = {
        let inner = strong.try_borrow().map_err(|_| PanelError::Busy(widget))?;
        is_alive(&inner)
    };
    if !alive {
        return Err(PanelError::Destroyed(widget));
    }
    Ok(strong)
}

/// Empty, absent or non-numeric input is 0; any integer is at least 1.
pub fn parse_quantity(raw: Option<&str>) -> u32 {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return 0;
    };
    match raw.parse::<i32>() {
        Ok(value) => value.max(1) as u32,
        Err(_) => 0,
    }
}
