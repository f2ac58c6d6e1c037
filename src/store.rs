use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Team already exists")]
    TeamExists,
    #[error("Unknown team")]
    UnknownTeam,
    #[error("Unknown token")]
    UnknownToken,
    #[error("Invalid tag: {0}")]
    InvalidTag(String),
}

/// Identifier shared between a pool entry and the per-team challenge it
/// produced. Lowercase alphanumeric plus dashes/underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Tag(String);

impl Tag {
    pub fn new(raw: &str) -> Result<Self, StoreError> {
        let raw = raw.trim().to_lowercase();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StoreError::InvalidTag(raw));
        }

        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Tag {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Challenge {
    pub tag: Tag,
    /// The value this particular team submits; may differ from what the
    /// upstream checker expects.
    pub value: String,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Challenge {
    pub fn new(tag: Tag, value: &str) -> Self {
        Self {
            tag,
            value: value.to_owned(),
            completed_at: None,
        }
    }
}

#[derive(Default)]
struct TeamState {
    challenges: HashMap<Tag, Challenge>,
    solved: Vec<Tag>,
    metadata: HashMap<String, String>,
}

/// A registered team. Identity fields are immutable; challenge and
/// metadata state sits behind the team's own lock so concurrent requests
/// for the same team serialize their writes.
pub struct Team {
    email: String,
    name: String,
    password: String,
    state: RwLock<TeamState>,
}

impl Team {
    pub fn new(email: &str, name: &str, password: &str, challenges: Vec<Challenge>) -> Self {
        let challenges = challenges.into_iter().map(|c| (c.tag.clone(), c)).collect();

        Self {
            email: email.trim().to_lowercase(),
            name: name.to_owned(),
            password: password.to_owned(),
            state: RwLock::new(TeamState {
                challenges,
                solved: Vec::new(),
                metadata: HashMap::new(),
            }),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn challenge(&self, tag: &Tag) -> Option<Challenge> {
        self.state.read().challenges.get(tag).cloned()
    }

    pub fn challenges(&self) -> Vec<Challenge> {
        self.state.read().challenges.values().cloned().collect()
    }

    /// Tags in the order their solves were recorded.
    pub fn solved(&self) -> Vec<Tag> {
        self.state.read().solved.clone()
    }

    pub fn metadata(&self, key: &str) -> Option<String> {
        self.state.read().metadata.get(key).cloned()
    }

    pub fn set_metadata(&self, key: &str, value: &str) {
        self.state
            .write()
            .metadata
            .insert(key.to_owned(), value.to_owned());
    }

    /// Serializable view of the team, for persistence hooks.
    pub fn snapshot(&self) -> TeamSnapshot {
        let state = self.state.read();
        let mut challenges: Vec<Challenge> = state.challenges.values().cloned().collect();
        challenges.sort_by(|a, b| a.tag.as_str().cmp(b.tag.as_str()));

        TeamSnapshot {
            email: self.email.clone(),
            name: self.name.clone(),
            metadata: state.metadata.clone(),
            challenges,
            solved: state.solved.clone(),
        }
    }
}

impl fmt::Debug for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Team")
            .field("email", &self.email)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamSnapshot {
    pub email: String,
    pub name: String,
    pub metadata: HashMap<String, String>,
    pub challenges: Vec<Challenge>,
    pub solved: Vec<Tag>,
}

pub type TeamHook = Box<dyn Fn(&Team) + Send + Sync>;

/// In-memory team registry. Hooks run after every committed mutation so
/// external code can snapshot; the store itself persists nothing.
pub struct TeamStore {
    teams: RwLock<HashMap<String, Arc<Team>>>,
    tokens: RwLock<HashMap<String, Arc<Team>>>,
    hooks: Vec<TeamHook>,
}

impl TeamStore {
    pub fn new() -> Self {
        Self::with_hooks(Vec::new())
    }

    pub fn with_hooks(hooks: Vec<TeamHook>) -> Self {
        Self {
            teams: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            hooks,
        }
    }

    pub fn create_team(&self, team: Team) -> Result<Arc<Team>, StoreError> {
        let team = Arc::new(team);

        {
            let mut teams = self.teams.write();
            if teams.contains_key(team.email()) {
                return Err(StoreError::TeamExists);
            }

            teams.insert(team.email().to_owned(), Arc::clone(&team));
        }

        self.run_hooks(&team);

        Ok(team)
    }

    /// Binds an upstream session token to a stored team. Rebinding an
    /// existing token overwrites the prior mapping.
    pub fn create_token_for_team(&self, token: &str, team: &Arc<Team>) -> Result<(), StoreError> {
        if !self.teams.read().contains_key(team.email()) {
            return Err(StoreError::UnknownTeam);
        }

        self.tokens.write().insert(token.to_owned(), Arc::clone(team));
        self.run_hooks(team);

        Ok(())
    }

    pub fn team_by_token(&self, token: &str) -> Result<Arc<Team>, StoreError> {
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(StoreError::UnknownToken)
    }

    pub fn team_by_email(&self, email: &str) -> Result<Arc<Team>, StoreError> {
        self.teams
            .read()
            .get(&email.trim().to_lowercase())
            .cloned()
            .ok_or(StoreError::UnknownTeam)
    }

    /// Marks the team's challenge as completed and appends it to the solved
    /// list. Returns true only for the call that performed the transition;
    /// a challenge that is unknown or already completed is left untouched.
    pub fn record_solve(&self, team: &Arc<Team>, tag: &Tag) -> bool {
        let committed = {
            let mut state = team.state.write();
            match state.challenges.get_mut(tag) {
                Some(chal) if chal.completed_at.is_none() => {
                    chal.completed_at = Some(Utc::now());
                    state.solved.push(tag.clone());
                    true
                }
                _ => false,
            }
        };

        if committed {
            self.run_hooks(team);
        }

        committed
    }

    fn run_hooks(&self, team: &Team) {
        for hook in &self.hooks {
            hook(team);
        }
    }
}

impl Default for TeamStore {
    fn default() -> Self {
        Self::new()
    }
}
