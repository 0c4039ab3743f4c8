pub mod game;

use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;

use gloo_timers::future::TimeoutFuture;
use log::{LevelFilter, Log, Metadata, Record};
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::js_sys::Promise;

pub use game::{
    ActionKind, ActionOutcome, ActionPayload, ActionResult, Card, CardCategory, CardId, Effect, EffectContext,
    EffectEngine, EffectResult, EffectSpec, EnergyType, EventSink, Format, GameAction, GameEvent, GameOutcome,
    GameSession, GameState, GameStatus, Phase, PlayerId, PlayerSetup, ResolutionMode, RuleError, RuleSet,
    SchedulerStep, SessionConfig, SessionError, SessionSnapshot, Slot, TargetRef, TriggerCondition,
    ValidationProfile, VictoryReason,
};

#[cfg(feature = "wee_alloc")]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

/// Upper bound on scheduler steps one `drainPaced` call will take.
const MAX_PACED_STEPS: usize = 256;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
    init_logging(LevelFilter::Info);
}

/// Routes `log` records to the browser console.
struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{}] {}: {}", record.level(), record.target(), record.args()));
        match record.level() {
            log::Level::Error => web_sys::console::error_1(&line),
            log::Level::Warn => web_sys::console::warn_1(&line),
            log::Level::Info => web_sys::console::info_1(&line),
            log::Level::Debug | log::Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

fn init_logging(level: LevelFilter) {
    // A logger may already be installed by the host; only the level changes then.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn parse_format(format: &str) -> Result<Format, JsValue> {
    Format::from_str(format).map_err(|_| JsValue::from_str(&format!("unknown format `{format}`")))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(serde_to_js_error)
}

#[derive(Serialize)]
struct TickResponse {
    elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    expired: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed: Option<EffectResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    waiting_ms: Option<u64>,
    status: GameStatus,
}

impl TickResponse {
    fn new(report: game::TickReport, status: GameStatus) -> Self {
        let (processed, waiting_ms) = match report.step {
            SchedulerStep::Idle => (None, None),
            SchedulerStep::Waiting { remaining_ms } => (None, Some(remaining_ms)),
            SchedulerStep::Processed { result, .. } => (Some(result), None),
        };
        Self {
            elapsed_ms: report.elapsed_ms,
            expired: report.expired.map(|expiry| format!("{expiry:?}")),
            processed,
            waiting_ms,
            status,
        }
    }
}

/// JavaScript handle on one game session. Every method that returns data
/// returns it as a JSON string.
#[wasm_bindgen(js_name = "GameSession")]
pub struct WasmGameSession {
    inner: Rc<RefCell<GameSession>>,
}

#[wasm_bindgen(js_class = "GameSession")]
impl WasmGameSession {
    #[wasm_bindgen(constructor)]
    pub fn new(format: &str, config_json: Option<String>) -> Result<WasmGameSession, JsValue> {
        let format = parse_format(format)?;
        let config = match config_json {
            Some(json) => SessionConfig::from_json(&json).map_err(serde_to_js_error)?,
            None => SessionConfig::default(),
        };
        let session = GameSession::with_config(format, config).map_err(serde_to_js_error)?;
        log::set_max_level(session.validation().profile().log_level());
        Ok(WasmGameSession {
            inner: Rc::new(RefCell::new(session)),
        })
    }

    /// Starts a two-player game with the built-in sample decks.
    #[wasm_bindgen(js_name = "startSample")]
    pub fn start_sample(&self) -> Result<String, JsValue> {
        let mut session = self.inner.borrow_mut();
        let format = session.format();
        session
            .start_game(vec![
                PlayerSetup::new(0, game::catalog::sample_deck(format, 1)),
                PlayerSetup::new(1, game::catalog::sample_deck(format, 1_001)),
            ])
            .map_err(serde_to_js_error)?;
        to_json(&session.snapshot())
    }

    /// Starts a game from a JSON array of `{ id, deck }` seats.
    #[wasm_bindgen(js_name = "startJson")]
    pub fn start_json(&self, setups_json: &str) -> Result<String, JsValue> {
        let setups: Vec<PlayerSetup> = serde_json::from_str(setups_json).map_err(serde_to_js_error)?;
        let mut session = self.inner.borrow_mut();
        session.start_game(setups).map_err(serde_to_js_error)?;
        to_json(&session.snapshot())
    }

    /// Submits one action. Rule violations come back inside the result, only
    /// malformed JSON is thrown.
    #[wasm_bindgen(js_name = "submitJson")]
    pub fn submit_json(&self, action_json: &str) -> Result<String, JsValue> {
        let action: GameAction = serde_json::from_str(action_json).map_err(serde_to_js_error)?;
        let result = self.inner.borrow_mut().submit_action(action);
        to_json(&result)
    }

    /// `now_ms` is read from the host's clock; every call on one session,
    /// `drainPaced` included, must use the same monotonic clock.
    pub fn tick(&self, now_ms: f64) -> Result<String, JsValue> {
        let mut session = self.inner.borrow_mut();
        let report = session.tick(now_ms.max(0.0) as u64);
        to_json(&TickResponse::new(report, session.state().status))
    }

    #[wasm_bindgen(js_name = "advancePhase")]
    pub fn advance_phase(&self) -> Result<Option<String>, JsValue> {
        let phase = self
            .inner
            .borrow_mut()
            .advance_phase()
            .map_err(|error| to_value(&error).unwrap_or_else(serde_to_js_error))?;
        Ok(phase.map(|phase| format!("{phase:?}")))
    }

    #[wasm_bindgen(js_name = "endGame")]
    pub fn end_game(&self, winner: Option<u8>, reason: &str) -> Result<bool, JsValue> {
        let reason: VictoryReason =
            serde_json::from_value(serde_json::Value::String(reason.to_string())).map_err(serde_to_js_error)?;
        Ok(self.inner.borrow_mut().end_game(winner, reason))
    }

    #[wasm_bindgen(js_name = "setValidationProfile")]
    pub fn set_validation_profile(&self, id: &str) -> Result<(), JsValue> {
        let mut session = self.inner.borrow_mut();
        session.set_validation_profile(id).map_err(serde_to_js_error)?;
        log::set_max_level(session.validation().profile().log_level());
        Ok(())
    }

    #[wasm_bindgen(js_name = "snapshotJson")]
    pub fn snapshot_json(&self) -> Result<String, JsValue> {
        to_json(&self.inner.borrow().snapshot())
    }

    #[wasm_bindgen(js_name = "statisticsJson")]
    pub fn statistics_json(&self) -> Result<String, JsValue> {
        to_json(&self.inner.borrow().statistics())
    }

    #[wasm_bindgen(js_name = "debugDump")]
    pub fn debug_dump(&self) -> String {
        self.inner.borrow().debug_dump()
    }

    #[wasm_bindgen(js_name = "drainEvents")]
    pub fn drain_events(&self) -> Result<String, JsValue> {
        to_json(&self.inner.borrow_mut().drain_events())
    }

    /// Steps a stepped-mode session until its queue is empty, sleeping for
    /// each effect's pacing delay. `now_ms` is the host clock passed to
    /// `tick`; later steps advance it by the time slept. Resolves to the
    /// events published meanwhile.
    #[wasm_bindgen(js_name = "drainPaced")]
    pub fn drain_paced(&self, now_ms: f64) -> Promise {
        let inner = Rc::clone(&self.inner);
        let mut clock_ms = now_ms.max(0.0) as u64;
        future_to_promise(async move {
            for _ in 0..MAX_PACED_STEPS {
                let step = {
                    let mut session = inner.borrow_mut();
                    session.tick(clock_ms).step
                };
                let delay = match step {
                    SchedulerStep::Idle => break,
                    SchedulerStep::Waiting { remaining_ms } => remaining_ms,
                    SchedulerStep::Processed { pacing_ms, .. } => pacing_ms,
                };
                if delay > 0 {
                    let delay = u32::try_from(delay).unwrap_or(u32::MAX);
                    TimeoutFuture::new(delay).await;
                    clock_ms = clock_ms.saturating_add(u64::from(delay));
                }
            }
            let events = inner.borrow_mut().drain_events();
            let json = serde_json::to_string(&events).map_err(serde_to_js_error)?;
            Ok(JsValue::from_str(&json))
        })
    }
}

/// A legal sample deck for `format`, for front-end debugging.
#[wasm_bindgen(js_name = "sampleDeck")]
pub fn sample_deck(format: &str, first_id: u32) -> Result<JsValue, JsValue> {
    let format = parse_format(format)?;
    to_value(&game::catalog::sample_deck(format, first_id)).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "defaultConfig")]
pub fn default_config() -> Result<JsValue, JsValue> {
    to_value(&SessionConfig::default()).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "ruleset")]
pub fn ruleset(format: &str) -> Result<JsValue, JsValue> {
    let ruleset = match parse_format(format)? {
        Format::Classic => RuleSet::classic(),
        Format::Pocket => RuleSet::pocket(),
    };
    to_value(&ruleset).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "validationProfiles")]
pub fn validation_profiles() -> Result<JsValue, JsValue> {
    let ids: Vec<&str> = game::config::profile_ids().collect();
    to_value(&ids).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "validateState")]
pub fn validate_state(state: JsValue) -> Result<(), JsValue> {
    let state: GameState = from_value(state).map_err(JsValue::from)?;
    state
        .integrity_check()
        .map_err(|error| to_value(&RuleError::IntegrityViolation { error }).unwrap_or_else(serde_to_js_error))
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}
