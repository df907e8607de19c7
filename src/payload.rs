//! The notification payload model: alert/badge/sound plus arbitrary
//! extras, with a canonical, idempotently-cached JSON rendering.

use std::cell::RefCell;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

const RESERVED_KEY: &str = "aps";

/// An APS notification payload.
///
/// `render_json` caches its output; any mutator invalidates the cache, and
/// repeated `render_json` calls with no mutation in between return
/// byte-identical strings.
#[derive(Debug, Default)]
pub struct Payload {
    alert: Option<String>,
    badge: Option<u32>,
    sound: Option<String>,
    extras: Map<String, Value>,
    rendered: RefCell<Option<String>>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_alert(&mut self, alert: impl Into<String>) -> &mut Self {
        self.alert = Some(alert.into());
        self.invalidate();
        self
    }

    pub fn set_badge(&mut self, badge: u32) -> &mut Self {
        self.badge = Some(badge);
        self.invalidate();
        self
    }

    pub fn set_sound(&mut self, sound: impl Into<String>) -> &mut Self {
        self.sound = Some(sound.into());
        self.invalidate();
        self
    }

    /// Adds an extra top-level key. Fails with [`Error::ReservedKey`] for
    /// the key `"aps"`; the payload is left unchanged in that case.
    pub fn add_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        let key = key.into();
        if key == RESERVED_KEY {
            return Err(Error::ReservedKey);
        }
        self.extras.insert(key, value.into());
        self.invalidate();
        Ok(self)
    }

    /// Renders the canonical JSON shape. Idempotent: calling this
    /// repeatedly with no mutation in between returns the same string.
    pub fn render_json(&self) -> String {
        if let Some(cached) = self.rendered.borrow().as_deref() {
            return cached.to_owned();
        }

        let mut aps = Map::new();
        let emit_badge = self.badge.unwrap_or(0) != 0 || (self.alert.is_none() && self.sound.is_none());

        if let Some(alert) = &self.alert {
            aps.insert("alert".into(), Value::String(alert.clone()));
        }
        if emit_badge {
            aps.insert("badge".into(), Value::from(self.badge.unwrap_or(0)));
        }
        if let Some(sound) = &self.sound {
            aps.insert("sound".into(), Value::String(sound.clone()));
        }

        let mut root = self.extras.clone();
        root.insert(RESERVED_KEY.into(), Value::Object(aps));

        let rendered = Value::Object(root).to_string();
        *self.rendered.borrow_mut() = Some(rendered.clone());
        rendered
    }

    fn invalidate(&mut self) {
        *self.rendered.borrow_mut() = None;
    }
}
