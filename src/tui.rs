use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result as AnyResult;
use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use rand::SeedableRng;
use rand::rngs::StdRng;
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Axis, Block, Chart, Dataset, GraphType, Paragraph};
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::account::PaperAccount;
use crate::command::{PanelCommand, TradeEvent};
use crate::config::MarketConfig;
use crate::panel::{Account, Shared, TradingPanelController};
use crate::series::{PriceSource, RenderArea, SeriesEngine, format_price};
use crate::widgets::{ActionButton, ChartSurface, PriceLabel, QuantityField};

const COLOR_PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Magenta,
    Color::Green,
    Color::LightBlue,
    Color::LightRed,
];
const RECENT_ACTIVITY: usize = 5;
const DEFAULT_QUANTITY: &str = "1";

struct PanelWidgets {
    price: Shared<PriceLabel>,
    quantity: Shared<QuantityField>,
    buy: Shared<ActionButton>,
    sell: Shared<ActionButton>,
}

impl PanelWidgets {
    fn open(price_text: String) -> Self {
        PanelWidgets {
            price: Rc::new(RefCell::new(PriceLabel::new(price_text))),
            quantity: Rc::new(RefCell::new(QuantityField::new(DEFAULT_QUANTITY))),
            buy: Rc::new(RefCell::new(ActionButton::new("Buy"))),
            sell: Rc::new(RefCell::new(ActionButton::new("Sell"))),
        }
    }

    fn destroy(&self) {
        self.price.borrow_mut().destroy();
        self.quantity.borrow_mut().destroy();
        self.buy.borrow_mut().destroy();
        self.sell.borrow_mut().destroy();
    }
}

struct MarketView {
    config: MarketConfig,
    engine: Shared<SeriesEngine<StdRng>>,
    account: Shared<PaperAccount>,
    surface: ChartSurface,
    widgets: Option<PanelWidgets>,
    controller: TradingPanelController,
    color: Color,
}

impl MarketView {
    fn new(
        config: MarketConfig,
        area: RenderArea,
        rng: StdRng,
        account: Shared<PaperAccount>,
        color: Color,
    ) -> AnyResult<Self> {
        let engine = SeriesEngine::new(config.series, Some(area), rng)?;
        let mut surface = ChartSurface::default();
        engine.publish(&mut surface);
        let widgets = PanelWidgets::open(engine.price_label());
        let engine = Rc::new(RefCell::new(engine));
        let controller = build_controller(&config.name, &engine, &account, Some(&widgets));
        Ok(MarketView {
            config,
            engine,
            account,
            surface,
            widgets: Some(widgets),
            controller,
            color,
        })
    }

    fn advance(&mut self, elapsed_seconds: f64) {
        let fired = self.engine.borrow_mut().tick(
            elapsed_seconds,
            self.config.scroll_speed,
            self.config.amplitude,
        );
        if fired {
            self.engine.borrow().publish(&mut self.surface);
        }
        let skipped = self.controller.refresh_tick();
        if skipped > 0 && self.widgets.is_none() {
            // widgets are gone for good, stop handing out stale references
            self.controller =
                build_controller(&self.config.name, &self.engine, &self.account, None);
        }
    }

    fn close_widgets(&mut self) {
        if let Some(widgets) = self.widgets.take() {
            widgets.destroy();
            info!(market = %self.config.name, "panel closed");
        }
    }

    fn open_widgets(&mut self) {
        let widgets = PanelWidgets::open(self.engine.borrow().price_label());
        self.controller = build_controller(
            &self.config.name,
            &self.engine,
            &self.account,
            Some(&widgets),
        );
        self.controller.refresh_tick();
        self.widgets = Some(widgets);
        info!(market = %self.config.name, "panel opened");
    }
}

fn build_controller(
    name: &str,
    engine: &Shared<SeriesEngine<StdRng>>,
    account: &Shared<PaperAccount>,
    widgets: Option<&PanelWidgets>,
) -> TradingPanelController {
    let series: Shared<dyn PriceSource> = engine.clone();
    let account: Shared<dyn Account> = account.clone();
    let controller = TradingPanelController::new(name)
        .with_series(series)
        .with_account(account);
    match widgets {
        Some(widgets) => controller
            .with_price_display(Rc::downgrade(&widgets.price))
            .with_quantity_input(Rc::downgrade(&widgets.quantity))
            .with_buy_control(Rc::downgrade(&widgets.buy))
            .with_sell_control(Rc::downgrade(&widgets.sell)),
        None => controller,
    }
}

pub struct TuiApp {
    markets: Vec<MarketView>,
    account: Shared<PaperAccount>,
    selected: usize,
    frame_interval: Duration,
    last_frame: Instant,
    status_message: Option<String>,
    status_visible_until: Option<Instant>,
    status_is_error: bool,
}

impl TuiApp {
    fn is_exit_key(key: &KeyEvent) -> bool {
        matches!(
            key.code,
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc
        ) || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
    }

    pub fn new(
        markets: &[MarketConfig],
        area: RenderArea,
        starting_cash: f64,
        seed: Option<u64>,
        frame_interval: Duration,
    ) -> AnyResult<TuiApp> {
        let account = Rc::new(RefCell::new(PaperAccount::new(starting_cash)));
        let mut views = Vec::with_capacity(markets.len());
        for (idx, config) in markets.iter().enumerate() {
            let rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(idx as u64)),
                None => StdRng::from_os_rng(),
            };
            views.push(MarketView::new(
                config.clone(),
                area,
                rng,
                account.clone(),
                COLOR_PALETTE[idx % COLOR_PALETTE.len()],
            )?);
        }
        Ok(TuiApp {
            markets: views,
            account,
            selected: 0,
            frame_interval,
            last_frame: Instant::now(),
            status_message: None,
            status_visible_until: None,
            status_is_error: false,
        })
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(3));
        self.status_is_error = false;
    }

    fn set_error_status_message(&mut self, message: impl Into<String>) {
        self.status_message = Some(message.into());
        self.status_visible_until = Some(Instant::now() + Duration::from_secs(5));
        self.status_is_error = true;
    }

    fn clear_status_if_allowed(&mut self) {
        if let Some(visible_until) = self.status_visible_until {
            if Instant::now() < visible_until {
                return;
            }
        }
        self.status_message = None;
        self.status_visible_until = None;
        self.status_is_error = false;
    }

    pub fn dispose(&self) {
        ratatui::restore();
    }

    pub async fn run(&mut self) -> Result<()> {
        color_eyre::install()?;
        let mut terminal = ratatui::init();
        let mut frame_tick = tokio::time::interval(self.frame_interval);
        frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.last_frame = Instant::now();
        loop {
            frame_tick.tick().await;
            let now = Instant::now();
            let elapsed = now.duration_since(self.last_frame).as_secs_f64();
            self.last_frame = now;

            self.clear_status_if_allowed();
            self.advance(elapsed);
            if self.poll_input()? {
                return Ok(());
            }
            terminal.draw(|frame| self.render(frame))?;
        }
    }

    /// One frame of simulation: charts scroll, panels refresh, trades surface.
    fn advance(&mut self, elapsed_seconds: f64) {
        for market in &mut self.markets {
            market.advance(elapsed_seconds);
        }
        let events = self.account.borrow_mut().drain_events();
        if let Some(event) = events.last() {
            self.show_trade_event(event);
        }
    }

    fn show_trade_event(&mut self, event: &TradeEvent) {
        if event.success {
            self.set_status_message(event.message.clone());
        } else {
            self.set_error_status_message(event.message.clone());
        }
    }

    fn poll_input(&mut self) -> Result<bool> {
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if Self::is_exit_key(&key) {
                        return Ok(true);
                    }
                    if let Some(command) = command_for_key(&key) {
                        self.apply(command);
                    }
                }
                _ => {}
            }
        }
        Ok(false)
    }

    fn apply(&mut self, command: PanelCommand) {
        if let PanelCommand::SelectMarket(delta) = command {
            let len = self.markets.len() as isize;
            if len > 0 {
                self.selected = (self.selected as isize + delta).rem_euclid(len) as usize;
            }
            return;
        }
        let Some(market) = self.markets.get_mut(self.selected) else {
            return;
        };
        let name = market.config.name.clone();
        match command {
            PanelCommand::Buy | PanelCommand::Sell => {
                let is_buy = command == PanelCommand::Buy;
                let enabled = market.widgets.as_ref().map(|widgets| {
                    let button = if is_buy { &widgets.buy } else { &widgets.sell };
                    button.borrow().enabled()
                });
                match enabled {
                    Some(true) if is_buy => {
                        market.controller.execute_buy();
                    }
                    Some(true) => {
                        market.controller.execute_sell();
                    }
                    Some(false) => {
                        let action = if is_buy { "Buy" } else { "Sell" };
                        self.set_error_status_message(format!("{action} is disabled for {name}"));
                    }
                    None => {
                        self.set_error_status_message(format!(
                            "{name} panel is closed, press x to reopen"
                        ));
                    }
                }
            }
            PanelCommand::ToggleWidgets => {
                if market.widgets.is_some() {
                    market.close_widgets();
                    self.set_status_message(format!("{name} panel closed"));
                } else {
                    market.open_widgets();
                    self.set_status_message(format!("{name} panel reopened"));
                }
            }
            PanelCommand::QuantityInput(c) => {
                if let Some(widgets) = &market.widgets {
                    widgets.quantity.borrow_mut().push(c);
                }
            }
            PanelCommand::QuantityBackspace => {
                if let Some(widgets) = &market.widgets {
                    widgets.quantity.borrow_mut().backspace();
                }
            }
            PanelCommand::SelectMarket(_) => {}
        }
    }

    fn render(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let (main_area, status_area) = if self.status_message.is_some() && area.height >= 8 {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(5), Constraint::Length(3)])
                .split(area);
            (chunks[0], Some(chunks[1]))
        } else {
            (area, None)
        };
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(40), Constraint::Length(34)])
            .split(main_area);
        self.render_charts(frame, columns[0]);
        self.render_trade_panel(frame, columns[1]);
        if let Some(status_area) = status_area {
            self.render_status(frame, status_area);
        }
    }

    fn render_charts(&self, frame: &mut Frame, area: Rect) {
        if self.markets.is_empty() {
            return;
        }
        let count = self.markets.len() as u32;
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints((0..count).map(|_| Constraint::Ratio(1, count)))
            .split(area);
        for (idx, market) in self.markets.iter().enumerate() {
            self.render_chart(frame, rows[idx], market, idx == self.selected);
        }
    }

    fn render_chart(&self, frame: &mut Frame, area: Rect, market: &MarketView, selected: bool) {
        let engine = market.engine.borrow();
        let render_area = engine.render_area();
        let x_bounds = symmetric_bounds(render_area.width);
        let y_bounds = symmetric_bounds(render_area.height);
        let (min_label, max_label) = engine.bound_labels();
        let y_labels = vec![
            Span::styled(min_label, Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(format_price(engine.value_for_render_y(0.0))),
            Span::styled(max_label, Style::default().add_modifier(Modifier::BOLD)),
        ];
        let dataset = Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(market.color))
            .data(market.surface.points());
        let border_style = if selected {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let title = Line::from(vec![
            Span::styled(
                market.config.name.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
            Span::styled(engine.price_label(), Style::default().fg(market.color)),
            Span::raw(" "),
            change_span(engine.window_change()),
        ]);
        let chart = Chart::new(vec![dataset])
            .block(Block::bordered().title(title).border_style(border_style))
            .x_axis(
                Axis::default()
                    .style(Style::default().fg(Color::Gray))
                    .bounds(x_bounds),
            )
            .y_axis(
                Axis::default()
                    .title("Price")
                    .style(Style::default().fg(Color::Gray))
                    .labels(y_labels)
                    .bounds(y_bounds),
            );
        frame.render_widget(chart, area);
    }

    fn render_trade_panel(&self, frame: &mut Frame, area: Rect) {
        let mut lines = Vec::new();
        if let Some(market) = self.markets.get(self.selected) {
            lines.push(Line::from(Span::styled(
                market.config.name.clone(),
                Style::default()
                    .fg(market.color)
                    .add_modifier(Modifier::BOLD),
            )));
            match &market.widgets {
                Some(widgets) => {
                    lines.push(Line::from(format!(
                        "Price    {}",
                        widgets.price.borrow().text()
                    )));
                    lines.push(Line::from(format!(
                        "Quantity [{}] x{}",
                        widgets.quantity.borrow().text(),
                        market.controller.last_quantity()
                    )));
                    lines.push(Line::from(vec![
                        button_span(&widgets.buy.borrow(), Color::Green),
                        Span::raw("  "),
                        button_span(&widgets.sell.borrow(), Color::Red),
                    ]));
                }
                None => {
                    lines.push(Line::from(Span::styled(
                        "panel closed (x to reopen)",
                        Style::default().fg(Color::DarkGray),
                    )));
                }
            }
        }
        let account = self.account.borrow();
        if let Some(market) = self.markets.get(self.selected) {
            let held = account
                .position(&market.config.name)
                .map(|position| position.quantity)
                .unwrap_or(0);
            lines.push(Line::from(format!("Holding  {held}")));
        }
        lines.push(Line::from(" "));
        lines.push(Line::from(format!("Cash     {}", format_price(account.cash()))));
        lines.push(Line::from(format!("P&L      {:+.2}", account.realized_pnl())));
        lines.push(Line::from(Span::styled(
            "Positions",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        let mut has_positions = false;
        for (market, position) in account.positions() {
            has_positions = true;
            lines.push(Line::from(format!(
                "  {market} {} @ {}",
                position.quantity,
                format_price(position.average_price())
            )));
        }
        if !has_positions {
            lines.push(Line::from("  none"));
        }
        lines.push(Line::from(" "));
        lines.push(Line::from(Span::styled(
            "Activity",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        let recent: Vec<&TradeEvent> = account.activity().collect();
        for event in recent.iter().rev().take(RECENT_ACTIVITY) {
            let color = if event.success {
                Color::Gray
            } else {
                Color::Red
            };
            lines.push(Line::from(Span::styled(
                format!(
                    "{} {} {}",
                    event.time_label(),
                    event.side.label(),
                    event.market
                ),
                Style::default().fg(color),
            )));
        }
        lines.push(Line::from(" "));
        lines.push(Line::from(Span::styled(
            "j/k select  b buy  s sell",
            Style::default().fg(Color::DarkGray),
        )));
        lines.push(Line::from(Span::styled(
            "0-9 qty  x panel  q quit",
            Style::default().fg(Color::DarkGray),
        )));
        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .block(Block::bordered().title("Trade"));
        frame.render_widget(paragraph, area);
    }

    fn render_status(&self, frame: &mut Frame, area: Rect) {
        if let Some(message) = &self.status_message {
            let color = if self.status_is_error {
                Color::Red
            } else {
                Color::Yellow
            };
            let status = Paragraph::new(message.as_str())
                .style(Style::default().fg(color))
                .alignment(Alignment::Left)
                .block(Block::bordered().title("Status"));
            frame.render_widget(status, area);
        }
    }
}

fn command_for_key(key: &KeyEvent) -> Option<PanelCommand> {
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => Some(PanelCommand::SelectMarket(-1)),
        KeyCode::Down | KeyCode::Char('j') => Some(PanelCommand::SelectMarket(1)),
        KeyCode::Char('b') | KeyCode::Char('B') => Some(PanelCommand::Buy),
        KeyCode::Char('s') | KeyCode::Char('S') => Some(PanelCommand::Sell),
        KeyCode::Char('x') | KeyCode::Char('X') => Some(PanelCommand::ToggleWidgets),
        KeyCode::Char(c) if c.is_ascii_digit() || c == '-' => Some(PanelCommand::QuantityInput(c)),
        KeyCode::Backspace => Some(PanelCommand::QuantityBackspace),
        _ => None,
    }
}

fn button_span(button: &ActionButton, color: Color) -> Span<'static> {
    let style = if button.enabled() {
        Style::default()
            .fg(Color::Black)
            .bg(color)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    Span::styled(format!("[ {} ]", button.label()), style)
}

fn change_span(change: f64) -> Span<'static> {
    let color = if change > 0.0 {
        Color::Green
    } else if change < 0.0 {
        Color::Red
    } else {
        Color::Gray
    };
    Span::styled(format!("{change:+.2}"), Style::default().fg(color))
}

fn symmetric_bounds(extent: f64) -> [f64; 2] {
    if extent > 0.0 {
        [-extent / 2.0, extent / 2.0]
    } else {
        [-1.0, 1.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesConfig;

    fn app(cash: f64) -> TuiApp {
        let markets = vec![
            MarketConfig {
                name: "GOLD".to_string(),
                series: SeriesConfig {
                    point_count: 10,
                    logical_min_y: 1.0,
                    logical_max_y: 2.0,
                },
                scroll_speed: 0.2,
                amplitude: 1.0,
            },
            MarketConfig {
                name: "SILVER".to_string(),
                series: SeriesConfig {
                    point_count: 10,
                    logical_min_y: 0.0,
                    logical_max_y: 10.0,
                },
                scroll_speed: 0.02,
                amplitude: 1.0,
            },
        ];
        TuiApp::new(
            &markets,
            RenderArea::new(16.0, 8.0),
            cash,
            Some(7),
            Duration::from_millis(50),
        )
        .unwrap()
    }

    #[test]
    fn markets_start_with_geometry_and_enabled_buy() {
        let mut app = app(100.0);
        assert_eq!(app.markets[0].surface.points().len(), 10);
        app.advance(0.0);
        let widgets = app.markets[0].widgets.as_ref().unwrap();
        assert!(widgets.buy.borrow().enabled());
        assert!(!widgets.sell.borrow().enabled());
        assert!(widgets.price.borrow().text().starts_with('$'));
    }

    #[test]
    fn buy_then_sell_through_the_panel() {
        let mut app = app(100.0);
        app.apply(PanelCommand::QuantityBackspace);
        app.apply(PanelCommand::QuantityInput('5'));
        app.advance(0.0);
        app.apply(PanelCommand::Buy);
        app.advance(0.0);
        assert_eq!(app.account.borrow().position("GOLD").unwrap().quantity, 5);
        assert!(!app.status_is_error);
        {
            let widgets = app.markets[0].widgets.as_ref().unwrap();
            assert!(widgets.sell.borrow().enabled());
        }
        app.apply(PanelCommand::Sell);
        app.advance(0.0);
        assert!(!app.account.borrow().has_position("GOLD"));
    }

    #[test]
    fn disabled_buy_is_not_dispatched() {
        let mut app = app(0.0);
        app.advance(0.0);
        app.apply(PanelCommand::Buy);
        assert!(app.status_is_error);
        assert_eq!(app.account.borrow().activity().count(), 0);
    }

    #[test]
    fn closed_panel_keeps_the_chart_running() {
        let mut app = app(100.0);
        app.apply(PanelCommand::SelectMarket(1));
        assert_eq!(app.selected, 1);
        app.apply(PanelCommand::ToggleWidgets);
        assert!(app.markets[1].widgets.is_none());
        app.advance(10.0);
        app.advance(10.0);
        assert_eq!(app.markets[1].controller.refresh_tick(), 0);
        app.apply(PanelCommand::ToggleWidgets);
        app.advance(0.0);
        let widgets = app.markets[1].widgets.as_ref().unwrap();
        assert!(widgets.buy.borrow().enabled());
    }

    #[test]
    fn selection_wraps() {
        let mut app = app(1.0);
        app.apply(PanelCommand::SelectMarket(-1));
        assert_eq!(app.selected, 1);
        app.apply(PanelCommand::SelectMarket(1));
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn maps_keys_to_commands() {
        let key = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(
            command_for_key(&key(KeyCode::Char('7'))),
            Some(PanelCommand::QuantityInput('7'))
        );
        assert_eq!(command_for_key(&key(KeyCode::Char('b'))), Some(PanelCommand::Buy));
        assert_eq!(command_for_key(&key(KeyCode::Char('z'))), None);
        assert!(TuiApp::is_exit_key(&KeyEvent::new(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL
        )));
    }
}
