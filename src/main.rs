pub mod api;
pub mod auth;
pub mod capture;
pub mod config;
pub mod enroll;
pub mod history;
pub mod metrics;
pub mod phrase;
pub mod runtime;
pub mod session;
pub mod ui;
pub mod util;

use crate::api::{
    AuthBackend, AuthHistory, AuthRequest, EnrollRequest, HttpBackend, RegisterRequest,
    UserProfile,
};
use crate::auth::LoginFlow;
use crate::capture::Capture;
use crate::config::{Config, ConfigStore, FileConfigStore};
use crate::enroll::{EnrollmentStage, EnrollmentWorkflow};
use crate::history::{AttemptDb, AttemptKind, AttemptRecord};
use crate::runtime::{
    ApiDispatcher, ApiOutcome, ApiReply, AppEvent, CrosstermEventSource, FixedTicker, Runner,
};
use crate::session::{FileSessionStore, SessionStore, StoredSession};
use crate::util::Clock;
use clap::{error::ErrorKind, CommandFactory, Parser};
use crossterm::{
    event::{
        KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    io::{self, stdin},
    sync::mpsc::Sender,
    sync::Arc,
    time::Duration,
};

const TICK_RATE_MS: u64 = 100;
/// How long transient server messages stay on screen.
const NOTICE_SECS: f64 = 3.0;
/// Pause on the enrollment-complete screen before returning to login.
const ENROLLED_REDIRECT_SECS: f64 = 3.0;

/// terminal client for keystroke-dynamics authentication
#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about,
    long_about = "Authenticate by typing rhythm instead of a password. Captures key press/release timing while you type a challenge phrase, shows live dwell/flight/speed metrics, and drives enrollment and verification against a keystroke-dynamics service."
)]
pub struct Cli {
    /// base url of the authentication service
    #[clap(short, long)]
    server_url: Option<String>,

    /// username to prefill on the login screen
    #[clap(short, long)]
    username: Option<String>,

    /// capture surface identity reported with each sample
    #[clap(short, long)]
    device_type: Option<String>,

    /// start on the registration screen
    #[clap(long)]
    register: bool,

    /// ignore any stored session and start at the login screen
    #[clap(long)]
    fresh: bool,

    /// request timeout in seconds for service calls
    #[clap(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Register,
    Login,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Name,
    Username,
    Phrase,
}

#[derive(Debug, Default)]
pub struct DashboardState {
    pub profile: Option<UserProfile>,
    pub history: Option<AuthHistory>,
}

pub struct App {
    pub screen: Screen,
    pub focus: Focus,
    pub capture: Capture,
    pub enrollment: EnrollmentWorkflow,
    pub login: LoginFlow,
    pub dashboard: DashboardState,
    pub name_input: String,
    pub username_input: String,
    pub error: Option<String>,
    pub notice: Option<String>,
    notice_ttl: f64,
    /// Pending navigation with a countdown in seconds.
    redirect: Option<(Screen, f64)>,
    device_type: String,
    clock: Clock,
    dispatcher: ApiDispatcher,
    backend: Arc<dyn AuthBackend>,
    session_store: Box<dyn SessionStore>,
    attempt_db: Option<AttemptDb>,
    pub session: Option<StoredSession>,
}

impl App {
    pub fn new(
        cli: &Cli,
        config: Config,
        backend: Arc<dyn AuthBackend>,
        session_store: Box<dyn SessionStore>,
        tx: Sender<AppEvent>,
    ) -> Self {
        let session = if cli.fresh { None } else { session_store.load() };

        let mut login = LoginFlow::new();
        if let Some(username) = &cli.username {
            login.username = username.clone();
        }

        let screen = if cli.register {
            Screen::Register
        } else if session.is_some() {
            Screen::Dashboard
        } else {
            Screen::Login
        };

        let focus = match screen {
            Screen::Register => Focus::Name,
            Screen::Login if login.username.is_empty() => Focus::Username,
            _ => Focus::Phrase,
        };

        let mut app = Self {
            screen,
            focus,
            capture: Capture::new(),
            enrollment: EnrollmentWorkflow::new(config.samples_required),
            login,
            dashboard: DashboardState::default(),
            name_input: String::new(),
            username_input: String::new(),
            error: None,
            notice: None,
            notice_ttl: 0.0,
            redirect: None,
            device_type: cli
                .device_type
                .clone()
                .unwrap_or_else(|| config.device_type.clone()),
            clock: Clock::new(),
            dispatcher: ApiDispatcher::new(tx),
            backend,
            session_store,
            attempt_db: AttemptDb::new().ok(),
            session,
        };

        if app.screen == Screen::Dashboard {
            app.fetch_dashboard();
        }
        app
    }

    pub fn is_loading(&self) -> bool {
        self.dispatcher.in_flight()
    }

    fn set_notice(&mut self, message: String) {
        self.error = None;
        self.notice = Some(message);
        self.notice_ttl = NOTICE_SECS;
    }

    fn set_error(&mut self, message: String) {
        self.notice = None;
        self.notice_ttl = 0.0;
        self.error = Some(message);
    }

    /// Tear down the current screen's request/capture state and move on.
    /// Invalidating first guarantees an in-flight reply can never touch the
    /// state of a screen we have already left.
    fn navigate(&mut self, screen: Screen) {
        self.dispatcher.invalidate();
        self.capture.reset();
        self.error = None;
        self.notice = None;
        self.notice_ttl = 0.0;
        self.redirect = None;
        match screen {
            Screen::Login => {
                self.login.retry();
                self.focus = if self.login.username.trim().is_empty() {
                    Focus::Username
                } else {
                    Focus::Phrase
                };
            }
            Screen::Dashboard => {
                self.dashboard = DashboardState::default();
                self.focus = Focus::Phrase;
            }
            Screen::Register => {
                self.focus = match self.enrollment.stage() {
                    EnrollmentStage::ProfilePending => Focus::Name,
                    _ => Focus::Phrase,
                };
            }
        }
        self.screen = screen;
        if self.screen == Screen::Dashboard {
            self.fetch_dashboard();
        }
    }

    /// Discard the in-progress sample (and orphan any in-flight request for
    /// it) and start capturing from scratch.
    fn reset_capture(&mut self) {
        self.dispatcher.invalidate();
        self.capture.reset();
        self.error = None;
    }

    pub fn on_tick(&mut self, dt_secs: f64) {
        if self.notice_ttl > 0.0 {
            self.notice_ttl -= dt_secs;
            if self.notice_ttl <= 0.0 {
                self.notice = None;
            }
        }

        if self.login.on_tick(dt_secs) {
            self.navigate(Screen::Dashboard);
            return;
        }

        if let Some((screen, remaining)) = self.redirect.take() {
            let remaining = remaining - dt_secs;
            if remaining <= 0.0 {
                self.navigate(screen);
            } else {
                self.redirect = Some((screen, remaining));
            }
        }
    }

    /// Returns true when the app should quit.
    pub fn handle_key(&mut self, key: &KeyEvent) -> bool {
        let is_press = key.kind == KeyEventKind::Press;
        if is_press {
            if key.code == KeyCode::Esc {
                return true;
            }
            if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                return true;
            }
        }

        match self.screen {
            Screen::Register => self.handle_register_key(key),
            Screen::Login => self.handle_login_key(key),
            Screen::Dashboard => self.handle_dashboard_key(key),
        }
        false
    }

    fn handle_register_key(&mut self, key: &KeyEvent) {
        match self.enrollment.stage() {
            EnrollmentStage::ProfilePending => self.handle_profile_key(key),
            EnrollmentStage::Collecting { .. } => {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Enter => {
                            self.submit_sample();
                            return;
                        }
                        KeyCode::Char('r')
                            if key.modifiers.contains(KeyModifiers::CONTROL) =>
                        {
                            self.reset_capture();
                            return;
                        }
                        _ => {}
                    }
                }
                self.capture.handle(key, self.clock.now_ms());
            }
            EnrollmentStage::Enrolled => {
                if key.kind == KeyEventKind::Press && key.code == KeyCode::Enter {
                    self.navigate(Screen::Login);
                }
            }
        }
    }

    fn handle_profile_key(&mut self, key: &KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.focus = if self.focus == Focus::Name {
                    Focus::Username
                } else {
                    Focus::Name
                };
            }
            KeyCode::Enter => {
                match self
                    .enrollment
                    .submit_profile(&self.name_input, &self.username_input)
                {
                    Ok(()) => {
                        self.error = None;
                        self.focus = Focus::Phrase;
                    }
                    Err(e) => self.set_error(e.to_string()),
                }
            }
            KeyCode::Backspace => {
                self.profile_field_mut().pop();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.profile_field_mut().push(c);
            }
            _ => {}
        }
    }

    fn profile_field_mut(&mut self) -> &mut String {
        match self.focus {
            Focus::Username => &mut self.username_input,
            _ => &mut self.name_input,
        }
    }

    fn handle_login_key(&mut self, key: &KeyEvent) {
        let is_press = key.kind == KeyEventKind::Press;

        if let Some(result) = self.login.result() {
            let authenticated = result.authenticated;
            if is_press {
                match key.code {
                    KeyCode::Enter => {
                        if authenticated && self.session.is_some() {
                            self.navigate(Screen::Dashboard);
                        } else if !authenticated {
                            self.retry_login();
                        }
                    }
                    KeyCode::Char('r') if !authenticated => self.retry_login(),
                    _ => {}
                }
            }
            return;
        }

        if is_press {
            match key.code {
                KeyCode::Tab | KeyCode::BackTab => {
                    self.focus = if self.focus == Focus::Username {
                        Focus::Phrase
                    } else {
                        Focus::Username
                    };
                    return;
                }
                KeyCode::Enter => {
                    self.submit_auth();
                    return;
                }
                KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    self.reset_capture();
                    return;
                }
                _ => {}
            }
        }

        match self.focus {
            Focus::Username => {
                if is_press {
                    match key.code {
                        KeyCode::Backspace => {
                            self.login.username.pop();
                        }
                        KeyCode::Char(c)
                            if !key.modifiers.contains(KeyModifiers::CONTROL) =>
                        {
                            self.login.username.push(c);
                        }
                        _ => {}
                    }
                }
            }
            _ => {
                self.capture.handle(key, self.clock.now_ms());
            }
        }
    }

    fn handle_dashboard_key(&mut self, key: &KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Char('r') => self.fetch_dashboard(),
            KeyCode::Char('e') => self.export_history(),
            KeyCode::Char('l') => {
                if let Err(e) = self.session_store.clear() {
                    log::warn!("failed to clear stored session: {}", e);
                }
                self.session = None;
                self.navigate(Screen::Login);
            }
            _ => {}
        }
    }

    fn retry_login(&mut self) {
        self.dispatcher.invalidate();
        self.capture.reset();
        self.login.retry();
        self.error = None;
        self.focus = Focus::Phrase;
    }

    fn submit_sample(&mut self) {
        if self.dispatcher.in_flight() || !self.enrollment.can_submit(&self.capture) {
            return;
        }
        self.error = None;

        let keystrokes = self.capture.keystrokes().to_vec();
        let backend = Arc::clone(&self.backend);
        if self.enrollment.is_first_sample() {
            let req = RegisterRequest {
                username: self.enrollment.username().to_string(),
                name: self.enrollment.name().to_string(),
                keystrokes,
                device_type: self.device_type.clone(),
            };
            self.dispatcher
                .dispatch(move || ApiOutcome::Enrollment(backend.register(&req)));
        } else {
            let req = EnrollRequest {
                username: self.enrollment.username().to_string(),
                keystrokes,
                device_type: self.device_type.clone(),
            };
            self.dispatcher
                .dispatch(move || ApiOutcome::Enrollment(backend.enroll(&req)));
        }
    }

    fn submit_auth(&mut self) {
        if self.dispatcher.in_flight() {
            return;
        }
        let username = match self.login.validated_username() {
            Ok(username) => username,
            Err(e) => {
                self.set_error(e.to_string());
                return;
            }
        };
        if !self.login.can_submit(&self.capture) {
            return;
        }
        self.error = None;

        let req = AuthRequest {
            username,
            keystrokes: self.capture.keystrokes().to_vec(),
            device_type: self.device_type.clone(),
        };
        let backend = Arc::clone(&self.backend);
        self.dispatcher
            .dispatch(move || ApiOutcome::Authentication(backend.authenticate(&req)));
    }

    fn fetch_dashboard(&mut self) {
        let Some(session) = self.session.clone() else {
            self.navigate(Screen::Login);
            return;
        };
        if self.dispatcher.in_flight() {
            return;
        }
        let backend = Arc::clone(&self.backend);
        self.dispatcher.dispatch(move || {
            let result = backend.profile(&session.token).and_then(|profile| {
                backend
                    .auth_history(&session.token)
                    .map(|history| (profile, history))
            });
            ApiOutcome::Dashboard(result)
        });
    }

    fn export_history(&mut self) {
        let Some(db) = &self.attempt_db else {
            self.set_error("local attempt log unavailable".to_string());
            return;
        };
        let path = AttemptDb::export_path();
        match db.export_csv(&path) {
            Ok(count) => self.set_notice(format!("exported {} attempts to {}", count, path.display())),
            Err(e) => self.set_error(format!("export failed: {}", e)),
        }
    }

    fn record_attempt(&self, kind: AttemptKind, accepted: bool, score: Option<f64>) {
        let Some(db) = &self.attempt_db else {
            return;
        };
        let username = match kind {
            AttemptKind::Enrollment => self.enrollment.username().to_string(),
            AttemptKind::Authentication => self.login.username.trim().to_string(),
        };
        let record = AttemptRecord {
            username,
            kind,
            accepted,
            confidence_score: score,
            keystroke_count: self.capture.keystrokes().len(),
            timestamp: chrono::Local::now(),
        };
        if let Err(e) = db.record_attempt(&record) {
            log::warn!("failed to record attempt locally: {}", e);
        }
    }

    pub fn handle_api(&mut self, reply: ApiReply) {
        if !self.dispatcher.settle(&reply) {
            return;
        }
        match reply.outcome {
            ApiOutcome::Enrollment(Ok(status)) => {
                let (previous, _) = self.enrollment.progress();
                let accepted = status.is_enrolled || status.samples_collected > previous;
                self.record_attempt(AttemptKind::Enrollment, accepted, None);

                self.enrollment.apply_status(&status);
                self.capture.reset();
                if self.enrollment.stage() == EnrollmentStage::Enrolled {
                    self.set_notice(status.message);
                    self.notice_ttl = ENROLLED_REDIRECT_SECS;
                    self.redirect = Some((Screen::Login, ENROLLED_REDIRECT_SECS));
                } else {
                    self.set_notice(status.message);
                }
            }
            ApiOutcome::Enrollment(Err(e)) => {
                self.set_error(e.to_string());
            }
            ApiOutcome::Authentication(Ok(response)) => {
                self.record_attempt(
                    AttemptKind::Authentication,
                    response.authenticated,
                    Some(response.confidence_score),
                );
                let username = self.login.username.trim().to_string();
                if let Some(token) = self.login.apply_response(response) {
                    let session = StoredSession::new(&token, &username);
                    if let Err(e) = self.session_store.save(&session) {
                        log::warn!("failed to store session: {}", e);
                    }
                    self.session = Some(session);
                }
            }
            ApiOutcome::Authentication(Err(e)) => {
                if e.is_session_invalid() {
                    if let Err(err) = self.session_store.clear() {
                        log::warn!("failed to clear stored session: {}", err);
                    }
                    self.session = None;
                }
                self.set_error(e.to_string());
            }
            ApiOutcome::Dashboard(Ok((profile, history))) => {
                self.dashboard.profile = Some(profile);
                self.dashboard.history = Some(history);
            }
            ApiOutcome::Dashboard(Err(e)) => {
                if e.is_session_invalid() {
                    if let Err(err) = self.session_store.clear() {
                        log::warn!("failed to clear stored session: {}", err);
                    }
                    self.session = None;
                    self.navigate(Screen::Login);
                    self.set_error("Session expired. Please authenticate again.".to_string());
                } else {
                    self.set_error(e.to_string());
                }
            }
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let config_store = FileConfigStore::new();
    let mut config = config_store.load();
    if let Some(server_url) = &cli.server_url {
        config.server_url = server_url.clone();
    }

    let backend = Arc::new(HttpBackend::new(
        &config.server_url,
        Duration::from_secs(cli.timeout_secs),
    )?);

    enable_raw_mode()?;
    // key release events only arrive under the kitty keyboard protocol;
    // without them there is no dwell time to measure
    let enhanced = crossterm::terminal::supports_keyboard_enhancement().unwrap_or(false);
    if !enhanced {
        disable_raw_mode()?;
        let mut cmd = Cli::command();
        cmd.error(
            ErrorKind::Io,
            "terminal does not report key release events (kitty keyboard protocol required)",
        )
        .exit();
    }

    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
    )?;
    let term_backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(term_backend)?;

    let events = CrosstermEventSource::new();
    let tx = events.sender();
    let mut app = App::new(
        &cli,
        config,
        backend,
        Box::new(FileSessionStore::new()),
        tx,
    );

    let result = run_app(&mut terminal, &mut app, events);

    execute!(
        terminal.backend_mut(),
        PopKeyboardEnhancementFlags,
        LeaveAlternateScreen
    )?;
    disable_raw_mode()?;
    terminal.show_cursor()?;

    result
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    events: CrosstermEventSource,
) -> Result<(), Box<dyn Error>> {
    let runner = Runner::new(events, FixedTicker::new(Duration::from_millis(TICK_RATE_MS)));

    loop {
        terminal.draw(|f| ui::draw(app, f))?;

        match runner.step() {
            AppEvent::Tick => app.on_tick(TICK_RATE_MS as f64 / 1000.0),
            AppEvent::Resize => {}
            AppEvent::Key(key) => {
                if app.handle_key(&key) {
                    break;
                }
            }
            AppEvent::Api(reply) => app.handle_api(reply),
        }
    }

    Ok(())
}
