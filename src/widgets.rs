//! Plain widget state behind the panel sink traits. The terminal UI owns
//! these and draws them each frame.

use crate::panel::{ControlSink, QuantitySource, TextSink};
use crate::series::PolylineSink;

const MAX_QUANTITY_CHARS: usize = 9;

#[derive(Debug, Clone, Default)]
pub struct PriceLabel {
    text: String,
    destroyed: bool,
}

impl PriceLabel {
    pub fn new(text: impl Into<String>) -> Self {
        PriceLabel {
            text: text.into(),
            destroyed: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn destroy(&mut self) {
        self.destroyed = true;
    }
}

impl TextSink for PriceLabel {
    fn is_alive(&self) -> bool {
        !self.destroyed
    }

    fn set_text(&mut self, text: String) {
        self.text = text;
    }
}

#[derive(Debug, Clone)]
pub struct ActionButton {
    label: &'static str,
    enabled: bool,
    destroyed: bool,
}

impl ActionButton {
    pub fn new(label: &'static str) -> Self {
        ActionButton {
            label,
            enabled: false,
            destroyed: false,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn destroy(&mut self) {
        self.destroyed = true;
    }
}

impl ControlSink for ActionButton {
    fn is_alive(&self) -> bool {
        !self.destroyed
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// Free text quantity entry. Only digits and a leading minus are typed in,
/// parsing is left to the panel.
#[derive(Debug, Clone, Default)]
pub struct QuantityField {
    text: String,
    destroyed: bool,
}

impl QuantityField {
    pub fn new(text: impl Into<String>) -> Self {
        QuantityField {
            text: text.into(),
            destroyed: false,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn push(&mut self, c: char) -> bool {
        let accepted = (c.is_ascii_digit() || (c == '-' && self.text.is_empty()))
            && self.text.len() < MAX_QUANTITY_CHARS;
        if accepted {
            self.text.push(c);
        }
        accepted
    }

    pub fn backspace(&mut self) {
        self.text.pop();
    }

    pub fn destroy(&mut self) {
        self.destroyed = true;
    }
}

impl QuantitySource for QuantityField {
    fn is_alive(&self) -> bool {
        !self.destroyed
    }

    fn raw_text(&self) -> String {
        self.text.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChartSurface {
    points: Vec<(f64, f64)>,
}

impl ChartSurface {
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }
}

impl PolylineSink for ChartSurface {
    fn set_polyline(&mut self, points: &[(f64, f64)]) {
        self.points.clear();
        self.points.extend_from_slice(points);
    }
}
