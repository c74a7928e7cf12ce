//! Channel/session transition tracking.
//!
//! Every navigation to a live-session page starts a new session generation,
//! empties the deduplication store and suppresses submissions until a quiet
//! interval and a grace period have both elapsed:
//!
//! ```text
//! IDLE --nav(session)--> TRANSITIONING --quiet--> GRACE --deadline--> ACTIVE
//!   ^                        |   ^                  |                    |
//!   |                        +---+ nav(session)     |                    |
//!   +------------------------ nav(other page) ------+--------------------+
//! ```
//!
//! Timers never get cancelled. Each one captures the generation it was
//! started for and does nothing if the tracker has moved on by the time it
//! fires.

use crate::deduplication::SharedDeduplicationStore;
use getset::{CopyGetters, Getters};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::broadcast;
use tokio::time::Instant;
use url::Url;

lazy_static! {
    static ref CHANNEL_NAME: Regex = Regex::new(r"^[a-z0-9_]{2,25}$").unwrap();
}

const EVENT_CAPACITY: usize = 64;

/// Classifies URLs as live-session pages by their path segments.
#[derive(Debug, Clone)]
pub struct SessionPageRules {
    /// Accepted hosts, any host if empty
    pub hosts: Vec<String>,
    /// Segments that mark a page as something other than a live session
    pub deny_segments: Vec<String>,
    /// Prefixes that wrap a channel page, e.g. `/popout/<channel>/chat`
    pub nested_prefixes: Vec<String>,
}

impl Default for SessionPageRules {
    fn default() -> Self {
        let deny = [
            "about", "clip", "clips", "collections", "directory", "downloads", "drops",
            "following", "friends", "inventory", "jobs", "login", "logout", "messages",
            "payments", "prime", "schedule", "search", "settings", "signup", "store",
            "subscriptions", "turbo", "videos", "wallet",
        ];
        Self {
            hosts: Vec::new(),
            deny_segments: deny.iter().map(|s| s.to_string()).collect(),
            nested_prefixes: ["popout", "embed", "moderator"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SessionPageRules {
    fn is_denied(&self, segment: &str) -> bool {
        self.deny_segments.iter().any(|denied| denied == segment)
    }

    /// The session a URL belongs to, or `None` for anything that is not a
    /// live-session page. Unparseable URLs are never session pages.
    pub fn session_id(&self, url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }

        let host = parsed.host_str()?;
        if !self.hosts.is_empty() && !self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
            return None;
        }

        let segments: Vec<String> = parsed
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_ascii_lowercase())
            .collect();

        let mut rest = segments.as_slice();
        if let Some(first) = rest.first() {
            if self.nested_prefixes.contains(first) {
                rest = &rest[1..];
            }
        }

        let (channel, tail) = rest.split_first()?;
        if self.is_denied(channel) || !CHANNEL_NAME.is_match(channel) {
            return None;
        }
        if tail.iter().any(|segment| self.is_denied(segment)) {
            return None;
        }
        Some(channel.clone())
    }
}

#[derive(Debug, Clone)]
pub struct TransitionConfig {
    /// Window after the quiet interval during which nothing is submitted
    pub grace_period: Duration,
    /// Quiet interval that collapses bursts of navigation events
    pub debounce: Duration,
    pub rules: SessionPageRules,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(5000),
            debounce: Duration::from_millis(500),
            rules: SessionPageRules::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionState {
    Idle,
    Transitioning,
    Grace,
    Active,
}

/// Snapshot of the tracked session.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ChannelSession {
    #[getset(get = "pub")]
    session_id: Option<String>,
    #[getset(get_copy = "pub")]
    generation: u64,
    #[getset(get_copy = "pub")]
    grace_deadline: Option<Instant>,
    #[getset(get_copy = "pub")]
    state: TransitionState,
}

impl ChannelSession {
    fn idle() -> Self {
        Self {
            session_id: None,
            generation: 0,
            grace_deadline: None,
            state: TransitionState::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    /// A new session began; ingestion for older generations is void.
    Started { generation: u64, session_id: String },
    /// The grace period for `generation` ended; ingestion may attach.
    Activated { generation: u64, session_id: String },
    /// Navigation left live-session pages.
    Ended { generation: u64 },
}

pub struct ChannelTransitionTracker {
    session: Mutex<ChannelSession>,
    dedup: SharedDeduplicationStore,
    grace_period: Mutex<Duration>,
    debounce: Duration,
    rules: SessionPageRules,
    events: broadcast::Sender<TransitionEvent>,
}

pub type SharedTransitionTracker = Arc<ChannelTransitionTracker>;

impl ChannelTransitionTracker {
    pub fn new(dedup: SharedDeduplicationStore, config: TransitionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session: Mutex::new(ChannelSession::idle()),
            dedup,
            grace_period: Mutex::new(config.grace_period),
            debounce: config.debounce,
            rules: config.rules,
            events,
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, ChannelSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    pub fn is_channel_like_page(&self, url: &str) -> bool {
        self.rules.session_id(url).is_some()
    }

    pub fn session(&self) -> ChannelSession {
        self.lock_session().clone()
    }

    pub fn state(&self) -> TransitionState {
        self.lock_session().state
    }

    pub fn current_generation(&self) -> u64 {
        self.lock_session().generation
    }

    /// True from the first navigation until the grace deadline has passed.
    pub fn is_in_grace_period(&self) -> bool {
        let session = self.lock_session();
        match session.state {
            TransitionState::Transitioning => true,
            TransitionState::Grace => session
                .grace_deadline
                .map_or(true, |deadline| Instant::now() < deadline),
            TransitionState::Idle | TransitionState::Active => false,
        }
    }

    /// Applies to transitions started after the call.
    pub fn set_grace_period(&self, grace_period: Duration) {
        *self.grace_period.lock().unwrap_or_else(PoisonError::into_inner) = grace_period;
    }

    fn emit(&self, event: TransitionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Record a navigation from `previous` to `current`.
    ///
    /// The debounce and grace timers run on the current tokio runtime. Called
    /// outside one, the state change is still recorded but the transition
    /// stays in TRANSITIONING until the next navigation from within a runtime.
    pub fn on_navigation(self: &Arc<Self>, previous: &str, current: &str) {
        let target = self.rules.session_id(current);
        let mut session = self.lock_session();

        let Some(session_id) = target else {
            if session.state == TransitionState::Idle {
                return;
            }
            session.generation += 1;
            session.state = TransitionState::Idle;
            session.session_id = None;
            session.grace_deadline = None;
            let generation = session.generation;
            drop(session);

            log::info!("Left live session ({} -> {}), ingestion stops", previous, current);
            self.emit(TransitionEvent::Ended { generation });
            return;
        };

        if session.state == TransitionState::Active
            && session.session_id.as_deref() == Some(session_id.as_str())
        {
            log::debug!("Navigation within session {}, ignored", session_id);
            return;
        }

        session.generation += 1;
        session.session_id = Some(session_id.clone());
        session.state = TransitionState::Transitioning;
        session.grace_deadline = None;
        let generation = session.generation;
        drop(session);

        self.dedup.reset();
        log::info!(
            "Session transition {} -> {} (generation {})",
            previous,
            current,
            generation
        );
        self.emit(TransitionEvent::Started {
            generation,
            session_id,
        });

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let tracker = Arc::clone(self);
                runtime.spawn(async move { tracker.run_timers(generation).await });
            }
            Err(err) => log::error!(
                "No runtime for the transition timers of generation {}: {}",
                generation,
                err
            ),
        }
    }

    async fn run_timers(self: Arc<Self>, generation: u64) {
        tokio::time::sleep(self.debounce).await;
        let Some(grace_period) = self.enter_grace(generation) else {
            return;
        };
        tokio::time::sleep(grace_period).await;
        self.activate(generation);
    }

    fn enter_grace(&self, generation: u64) -> Option<Duration> {
        let mut session = self.lock_session();
        if session.generation != generation || session.state != TransitionState::Transitioning {
            return None;
        }
        let grace_period = *self.grace_period.lock().unwrap_or_else(PoisonError::into_inner);
        session.state = TransitionState::Grace;
        session.grace_deadline = Some(Instant::now() + grace_period);
        log::debug!(
            "Generation {} in grace period for {:?}",
            generation,
            grace_period
        );
        Some(grace_period)
    }

    fn activate(&self, generation: u64) {
        let mut session = self.lock_session();
        if session.generation != generation || session.state != TransitionState::Grace {
            return;
        }
        session.state = TransitionState::Active;
        let session_id = session.session_id.clone().unwrap_or_default();
        drop(session);

        log::info!("Session {} active (generation {})", session_id, generation);
        self.emit(TransitionEvent::Activated {
            generation,
            session_id,
        });
    }
}
