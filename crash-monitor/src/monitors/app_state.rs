use crate::{EnabledFlag, Error, Monitor, MonitorKind};
use crash_report::{AppStateSnapshot, BufferedFileSink, CrashEvent};
use parking_lot::Mutex;
use report_json::{DecodeCallbacks, Encoder, JsonError};
use std::{
    path::{Path, PathBuf},
    time::Instant,
};

/// Version of the state file layout
const STATE_VERSION: i64 = 1;

mod keys {
    pub const VERSION: &str = "version";
    pub const CRASHED_LAST_LAUNCH: &str = "crashedLastLaunch";
    pub const ACTIVE_DURATION: &str = "activeDurationSinceLastCrash";
    pub const BACKGROUND_DURATION: &str = "backgroundDurationSinceLastCrash";
    pub const LAUNCHES: &str = "launchesSinceLastCrash";
    pub const SESSIONS: &str = "sessionsSinceLastCrash";
}

#[derive(Debug)]
struct AppState {
    active_duration_since_last_crash: f64,
    background_duration_since_last_crash: f64,
    launches_since_last_crash: i64,
    sessions_since_last_crash: i64,
    crashed_last_launch: bool,
    crashed_this_launch: bool,

    active_duration_since_launch: f64,
    background_duration_since_launch: f64,
    sessions_since_launch: i64,
    transition: Instant,
    is_active: bool,
    is_in_foreground: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            active_duration_since_last_crash: 0.0,
            background_duration_since_last_crash: 0.0,
            launches_since_last_crash: 0,
            sessions_since_last_crash: 0,
            crashed_last_launch: false,
            crashed_this_launch: false,
            active_duration_since_launch: 0.0,
            background_duration_since_launch: 0.0,
            sessions_since_launch: 0,
            transition: Instant::now(),
            is_active: false,
            is_in_foreground: false,
        }
    }
}

impl AppState {
    /// Accounts the time since the last transition to the current state
    fn update_durations(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.transition).as_secs_f64();
        self.transition = now;

        if self.is_active {
            self.active_duration_since_launch += elapsed;
            self.active_duration_since_last_crash += elapsed;
        } else if !self.is_in_foreground {
            self.background_duration_since_launch += elapsed;
            self.background_duration_since_last_crash += elapsed;
        }
    }

    fn snapshot(&self) -> AppStateSnapshot {
        AppStateSnapshot {
            is_active: self.is_active,
            is_in_foreground: self.is_in_foreground,
            launches_since_last_crash: self.launches_since_last_crash,
            sessions_since_last_crash: self.sessions_since_last_crash,
            active_duration_since_last_crash: self.active_duration_since_last_crash,
            background_duration_since_last_crash: self.background_duration_since_last_crash,
            sessions_since_launch: self.sessions_since_launch,
            active_duration_since_launch: self.active_duration_since_launch,
            background_duration_since_launch: self.background_duration_since_launch,
        }
    }
}

struct StateLoader<'s> {
    state: &'s mut AppState,
}

impl DecodeCallbacks for StateLoader<'_> {
    fn on_boolean(&mut self, name: Option<&str>, value: bool) -> Result<(), JsonError> {
        if name == Some(keys::CRASHED_LAST_LAUNCH) {
            self.state.crashed_last_launch = value;
        }
        Ok(())
    }

    fn on_integer(&mut self, name: Option<&str>, value: i64) -> Result<(), JsonError> {
        match name {
            Some(keys::VERSION) if value > STATE_VERSION => {
                log::error!("app state version {value} is newer than {STATE_VERSION}");
                return Err(JsonError::InvalidData);
            }
            Some(keys::LAUNCHES) => self.state.launches_since_last_crash = value,
            Some(keys::SESSIONS) => self.state.sessions_since_last_crash = value,
            // Whole durations are written without a fraction
            Some(keys::ACTIVE_DURATION | keys::BACKGROUND_DURATION) => {
                self.on_floating_point(name, value as f64)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn on_floating_point(&mut self, name: Option<&str>, value: f64) -> Result<(), JsonError> {
        match name {
            Some(keys::ACTIVE_DURATION) => self.state.active_duration_since_last_crash = value,
            Some(keys::BACKGROUND_DURATION) => {
                self.state.background_duration_since_last_crash = value;
            }
            _ => {}
        }
        Ok(())
    }
}

fn load_state(path: &Path, state: &mut AppState) -> Result<(), Error> {
    let data = std::fs::read(path)?;
    let mut strings = [0u8; 512];
    report_json::decode(&data, &mut strings, &mut StateLoader { state })?;
    Ok(())
}

fn save_state(path: &Path, state: &AppState) -> Result<(), Error> {
    let sink = BufferedFileSink::create(path)?;
    let mut enc = Encoder::new(sink, true);

    enc.begin_object(None)?;
    enc.add_integer(Some(keys::VERSION), STATE_VERSION)?;
    // What was this launch is the last launch the next time the file is read
    enc.add_boolean(Some(keys::CRASHED_LAST_LAUNCH), state.crashed_this_launch)?;
    enc.add_float(
        Some(keys::ACTIVE_DURATION),
        state.active_duration_since_last_crash,
    )?;
    enc.add_float(
        Some(keys::BACKGROUND_DURATION),
        state.background_duration_since_last_crash,
    )?;
    enc.add_integer(Some(keys::LAUNCHES), state.launches_since_last_crash)?;
    enc.add_integer(Some(keys::SESSIONS), state.sessions_since_last_crash)?;
    enc.end_encode()?;
    enc.flush()?;
    Ok(())
}

/// Tracks launches, sessions, and the time spent active and in the
/// background, both since this launch and since the last crash.
///
/// The counters that span launches are kept in a JSON state file which is
/// rewritten when the application moves to the background, terminates, or
/// crashes. Processes that never report lifecycle transitions count as
/// active and in the foreground for their whole lifetime.
#[derive(Debug)]
pub struct AppStateMonitor {
    enabled: EnabledFlag,
    path: PathBuf,
    state: Mutex<AppState>,
}

impl AppStateMonitor {
    /// Loads the state left by the previous launch at `path` and records a
    /// new launch.
    ///
    /// A missing or unreadable state file starts the counters from scratch.
    pub fn launch(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = AppState::default();

        if path.exists() {
            if let Err(err) = load_state(&path, &mut state) {
                log::warn!("discarding app state {}: {err}", path.display());
                state = AppState::default();
            }
        }

        if state.crashed_last_launch {
            state.active_duration_since_last_crash = 0.0;
            state.background_duration_since_last_crash = 0.0;
            state.launches_since_last_crash = 0;
            state.sessions_since_last_crash = 0;
        }
        state.crashed_this_launch = false;

        state.launches_since_last_crash += 1;
        state.sessions_since_last_crash += 1;
        state.sessions_since_launch = 1;
        state.is_active = true;
        state.is_in_foreground = true;
        state.transition = Instant::now();

        if let Err(err) = save_state(&path, &state) {
            log::error!("unable to save app state {}: {err}", path.display());
        }

        Self {
            enabled: EnabledFlag::default(),
            path,
            state: Mutex::new(state),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the previous launch ended in a crash
    pub fn crashed_last_launch(&self) -> bool {
        self.state.lock().crashed_last_launch
    }

    pub fn snapshot(&self) -> AppStateSnapshot {
        let mut state = self.state.lock();
        state.update_durations();
        state.snapshot()
    }

    /// The application became active (receives input) or stopped being
    /// active
    pub fn set_active(&self, is_active: bool) {
        let mut state = self.state.lock();
        state.update_durations();
        state.is_active = is_active;
    }

    /// The application moved to the foreground, starting a new session, or
    /// to the background
    pub fn set_in_foreground(&self, is_in_foreground: bool) {
        let mut state = self.state.lock();
        state.update_durations();

        if is_in_foreground {
            state.sessions_since_launch += 1;
            state.sessions_since_last_crash += 1;
        }
        state.is_in_foreground = is_in_foreground;

        if !is_in_foreground {
            self.save(&state);
        }
    }

    /// The application is terminating normally
    pub fn terminate(&self) {
        let mut state = self.state.lock();
        state.update_durations();
        self.save(&state);
    }

    fn save(&self, state: &AppState) {
        if let Err(err) = save_state(&self.path, state) {
            log::error!("unable to save app state {}: {err}", self.path.display());
        }
    }
}

impl Monitor for AppStateMonitor {
    fn kind(&self) -> MonitorKind {
        MonitorKind::APPLICATION_STATE
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    /// Fatal events are recorded as the crash of this launch
    fn add_contextual_info(&self, event: &mut CrashEvent<'_>) -> Result<(), Error> {
        let mut state = self
            .state
            .try_lock()
            .ok_or(Error::StateLocked(MonitorKind::APPLICATION_STATE))?;
        state.update_durations();

        if !event.is_user_reported() {
            state.crashed_this_launch = true;
            save_state(&self.path, &state)?;
        }

        event.app_state = state.snapshot();
        Ok(())
    }
}
