//! The elimination state machine.
//!
//! [`SessionMachine`] is pure: no IO, no async, no clocks. It decides how the
//! local projection changes in response to user intents and remote events,
//! and which full document (if any) must be pushed. The [`Engine`] executes
//! those pushes and feeds remote events and timer expiries back in.
//!
//! [`Engine`]: crate::Engine

use crate::config::SessionConfig;
use crate::document::{Selection, SessionDocument};
use crate::error::{NoOpReason, SyncError};
use crate::roster::{undrawn, DrawPolicy, ImageCatalog, Roster, SpinPlan};
use std::collections::VecDeque;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Own writes remembered for echo detection. Older ones are forgotten.
const MAX_IN_FLIGHT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    AwaitingRemote,
    /// Terminal for the life of the client.
    Ready,
}

/// Local-only snapshot taken just before a draw. Never synchronized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRecord {
    pub previous_roster: Vec<String>,
    pub previous_drawn_set: Vec<String>,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub phase: Phase,
    pub roster: Vec<String>,
    /// Most recent first.
    pub drawn_set: Vec<String>,
    pub current_selection: Option<Selection>,
    pub celebrating: bool,
    pub can_undo: bool,
    pub revision: u64,
}

impl Projection {
    pub fn is_awaiting_remote(&self) -> bool {
        self.phase != Phase::Ready
    }

    pub fn remaining(&self) -> Vec<&str> {
        undrawn(&self.roster, &self.drawn_set)
    }
}

/// Result of a user intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `spin` is `None` when the last remaining identifier was drawn directly.
    Drawn {
        selection: Selection,
        spin: Option<SpinPlan>,
    },
    Undone,
    Reset,
    Dismissed,
    NoOp(NoOpReason),
}

impl Outcome {
    pub fn selection(&self) -> Option<&Selection> {
        match self {
            Outcome::Drawn { selection, .. } => Some(selection),
            _ => None,
        }
    }
}

/// A user intent forwarded by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Draw,
    Undo,
    Reset,
    Dismiss,
}

/// Something the remote side did.
#[derive(Debug)]
pub enum RemoteEvent {
    /// The read-then-initialize-if-absent sequence finished.
    InitCompleted { created: bool },
    /// A subscription push. `None` means the document is absent.
    Pushed(Option<SessionDocument>),
    Failed(SyncError),
}

/// What the engine has to do after an intent.
#[derive(Debug)]
pub struct Decision {
    pub outcome: Outcome,
    pub push: Option<SessionDocument>,
}

impl Decision {
    fn noop(reason: NoOpReason) -> Self {
        Self {
            outcome: Outcome::NoOp(reason),
            push: None,
        }
    }
}

pub struct SessionMachine {
    client_id: Uuid,
    canonical: Roster,
    catalog: ImageCatalog,
    policy: DrawPolicy,

    phase: Phase,
    roster: Vec<String>,
    drawn_set: Vec<String>,
    current_selection: Option<Selection>,
    undo: Option<UndoRecord>,
    revision: u64,

    celebrating: bool,
    celebration_epoch: u64,

    init_completed: bool,
    seen_push: bool,
    in_flight: VecDeque<u64>,
}

impl SessionMachine {
    pub fn new(config: &SessionConfig, client_id: Uuid) -> Self {
        Self {
            client_id,
            canonical: config.roster(),
            catalog: config.catalog(),
            policy: config.policy(),
            phase: Phase::Uninitialized,
            roster: Vec::new(),
            drawn_set: Vec::new(),
            current_selection: None,
            undo: None,
            revision: 0,
            celebrating: false,
            celebration_epoch: 0,
            init_completed: false,
            seen_push: false,
            in_flight: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn undo_record(&self) -> Option<&UndoRecord> {
        self.undo.as_ref()
    }

    pub fn celebrating(&self) -> bool {
        self.celebrating
    }

    /// Changes every time a new selection starts being celebrated.
    pub fn celebration_epoch(&self) -> u64 {
        self.celebration_epoch
    }

    /// The document a brand-new session is created with.
    pub fn fresh_document(&self) -> SessionDocument {
        SessionDocument::fresh(&self.canonical)
    }

    /// The startup fallback timer runs until the first subscription push.
    /// Finishing initialization alone does not disarm it.
    pub fn startup_timer_armed(&self) -> bool {
        self.phase == Phase::AwaitingRemote && !self.seen_push
    }

    pub fn projection(&self) -> Projection {
        Projection {
            phase: self.phase,
            roster: self.roster.clone(),
            drawn_set: self.drawn_set.clone(),
            current_selection: self.current_selection.clone(),
            celebrating: self.celebrating,
            can_undo: self.undo.is_some(),
            revision: self.revision,
        }
    }

    pub fn begin(&mut self) {
        if self.phase == Phase::Uninitialized {
            self.phase = Phase::AwaitingRemote;
            debug!("awaiting remote session");
        }
    }

    pub fn handle_remote(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::InitCompleted { created } => {
                debug!(created, "session initialization finished");
                self.init_completed = true;
                if self.phase == Phase::AwaitingRemote && self.seen_push {
                    self.become_ready();
                }
            }
            RemoteEvent::Pushed(None) => debug!("ignoring absent session document"),
            RemoteEvent::Pushed(Some(document)) => self.apply_push(document),
            RemoteEvent::Failed(err) => {
                warn!(error = %err, "remote store failure; continuing on local projection");
                if self.phase == Phase::AwaitingRemote {
                    self.seed_locally();
                }
            }
        }
    }

    pub fn startup_timed_out(&mut self) {
        if self.phase == Phase::AwaitingRemote {
            warn!("no response from remote store; seeding session locally");
            self.seed_locally();
        }
    }

    pub fn handle_intent(&mut self, intent: Intent) -> Decision {
        match intent {
            Intent::Draw => self.draw(),
            Intent::Undo => self.undo(),
            Intent::Reset => self.reset(),
            Intent::Dismiss => self.dismiss(),
        }
    }

    pub fn draw(&mut self) -> Decision {
        if self.phase != Phase::Ready {
            return Decision::noop(NoOpReason::NotReady);
        }
        let remaining = undrawn(&self.roster, &self.drawn_set).len();
        let Some(identifier) = self
            .policy
            .next(&self.roster, &self.drawn_set)
            .map(str::to_string)
        else {
            return Decision::noop(NoOpReason::NothingToDraw);
        };

        let spin = self
            .roster
            .iter()
            .position(|id| *id == identifier)
            .filter(|_| remaining > 1)
            .map(SpinPlan::landing_on);

        self.undo = Some(UndoRecord {
            previous_roster: self.roster.clone(),
            previous_drawn_set: self.drawn_set.clone(),
        });
        self.drawn_set.insert(0, identifier.clone());
        let selection = Selection {
            display_image: self.catalog.image_for(&identifier),
            identifier,
        };
        self.current_selection = Some(selection.clone());
        self.start_celebration();

        debug!(identifier = %selection.identifier, remaining = remaining - 1, "drew");
        Decision {
            outcome: Outcome::Drawn { selection, spin },
            push: Some(self.next_push()),
        }
    }

    pub fn undo(&mut self) -> Decision {
        if self.phase != Phase::Ready {
            return Decision::noop(NoOpReason::NotReady);
        }
        let Some(record) = self.undo.take() else {
            return Decision::noop(NoOpReason::NothingToUndo);
        };
        self.roster = record.previous_roster;
        self.drawn_set = record.previous_drawn_set;
        self.current_selection = None;
        self.celebrating = false;

        debug!(drawn = self.drawn_set.len(), "undid last draw");
        Decision {
            outcome: Outcome::Undone,
            push: Some(self.next_push()),
        }
    }

    /// Applies in every phase. Before `Ready` the pushed document competes
    /// with session creation like any other write; whichever lands last wins.
    pub fn reset(&mut self) -> Decision {
        self.roster = self.canonical.to_vec();
        self.drawn_set.clear();
        self.current_selection = None;
        self.undo = None;
        self.celebrating = false;

        info!("session reset");
        Decision {
            outcome: Outcome::Reset,
            push: Some(self.next_push()),
        }
    }

    /// Hide the celebration. The selection itself stays.
    pub fn dismiss(&mut self) -> Decision {
        self.celebrating = false;
        Decision {
            outcome: Outcome::Dismissed,
            push: None,
        }
    }

    fn apply_push(&mut self, document: SessionDocument) {
        let own_echo = document.writer == Some(self.client_id)
            && self.in_flight.contains(&document.revision);

        if own_echo {
            while let Some(revision) = self.in_flight.pop_front() {
                if revision == document.revision {
                    break;
                }
            }
            if !self.in_flight.is_empty() {
                debug!(revision = document.revision, "skipping echo of superseded own write");
                return;
            }
        } else {
            // A newer foreign write means our pending writes may or may not
            // win; whatever lands last comes back as a push.
            self.in_flight.clear();
            if self.undo.take().is_some() {
                debug!("remote update invalidated local undo");
            }
        }

        let (document, changed) = document.sanitized();
        if changed {
            warn!(
                revision = document.revision,
                "remote document had stray or duplicate identifiers; dropped them"
            );
        }

        if document.current_selection.is_none() {
            self.celebrating = false;
        } else if document.current_selection != self.current_selection {
            self.start_celebration();
        }

        self.roster = document.roster;
        self.drawn_set = document.drawn_set;
        self.current_selection = document.current_selection;
        self.revision = document.revision;
        self.seen_push = true;

        debug!(
            revision = self.revision,
            drawn = self.drawn_set.len(),
            own_echo,
            "applied remote document"
        );

        if self.phase == Phase::AwaitingRemote && self.init_completed {
            self.become_ready();
        }
    }

    fn seed_locally(&mut self) {
        self.roster = self.canonical.to_vec();
        self.drawn_set.clear();
        self.current_selection = None;
        self.undo = None;
        self.celebrating = false;
        self.become_ready();
    }

    fn become_ready(&mut self) {
        self.phase = Phase::Ready;
        info!(
            roster = self.roster.len(),
            drawn = self.drawn_set.len(),
            "session ready"
        );
    }

    fn start_celebration(&mut self) {
        self.celebrating = true;
        self.celebration_epoch += 1;
    }

    fn next_push(&mut self) -> SessionDocument {
        self.revision += 1;
        self.in_flight.push_back(self.revision);
        if self.in_flight.len() > MAX_IN_FLIGHT {
            self.in_flight.pop_front();
        }
        SessionDocument {
            initialized: true,
            roster: self.roster.clone(),
            drawn_set: self.drawn_set.clone(),
            current_selection: self.current_selection.clone(),
            revision: self.revision,
            writer: Some(self.client_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(roster: &[&str]) -> SessionConfig {
        SessionConfig {
            roster: roster.iter().map(|s| s.to_string()).collect(),
            ..SessionConfig::default()
        }
    }

    /// A machine that went through the normal startup sequence.
    fn ready_machine(roster: &[&str]) -> SessionMachine {
        let mut machine = SessionMachine::new(&config(roster), Uuid::new_v4());
        machine.begin();
        let fresh = machine.fresh_document();
        machine.handle_remote(RemoteEvent::InitCompleted { created: true });
        machine.handle_remote(RemoteEvent::Pushed(Some(fresh)));
        assert_eq!(machine.phase(), Phase::Ready);
        machine
    }

    fn assert_invariants(machine: &SessionMachine) {
        let p = machine.projection();
        for id in &p.drawn_set {
            assert!(p.roster.contains(id), "{id} drawn but not on roster");
        }
        let mut sorted = p.drawn_set.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), p.drawn_set.len(), "duplicate in drawn set");
        assert!(p.drawn_set.len() <= p.roster.len());
    }

    fn foreign(doc: SessionDocument) -> RemoteEvent {
        RemoteEvent::Pushed(Some(SessionDocument {
            writer: Some(Uuid::new_v4()),
            ..doc
        }))
    }

    #[test]
    fn ready_needs_both_init_and_first_push() {
        let mut machine = SessionMachine::new(&config(&["a", "b"]), Uuid::new_v4());
        assert_eq!(machine.phase(), Phase::Uninitialized);
        machine.begin();
        assert_eq!(machine.phase(), Phase::AwaitingRemote);
        assert!(machine.startup_timer_armed());

        let fresh = machine.fresh_document();
        machine.handle_remote(RemoteEvent::Pushed(Some(fresh)));
        assert_eq!(machine.phase(), Phase::AwaitingRemote);
        assert!(!machine.startup_timer_armed());

        machine.handle_remote(RemoteEvent::InitCompleted { created: false });
        assert_eq!(machine.phase(), Phase::Ready);
    }

    #[test]
    fn draw_and_undo_before_ready_are_noops() {
        let mut machine = SessionMachine::new(&config(&["a"]), Uuid::new_v4());
        machine.begin();
        for decision in [machine.draw(), machine.undo()] {
            assert_eq!(decision.outcome, Outcome::NoOp(NoOpReason::NotReady));
            assert!(decision.push.is_none());
        }
    }

    #[test]
    fn reset_before_ready_still_applies() {
        let mut machine = SessionMachine::new(&config(&["a", "b"]), Uuid::new_v4());
        machine.begin();
        let decision = machine.reset();
        assert_eq!(decision.outcome, Outcome::Reset);
        let pushed = decision.push.expect("reset pushes");
        assert_eq!(pushed.roster, vec!["a", "b"]);

        let p = machine.projection();
        assert_eq!(p.roster, vec!["a", "b"]);
        assert!(p.drawn_set.is_empty());
        assert_eq!(p.phase, Phase::AwaitingRemote);
        assert!(machine.startup_timer_armed());
    }

    #[test]
    fn init_without_push_keeps_startup_timer_armed() {
        let mut machine = SessionMachine::new(&config(&["a", "b"]), Uuid::new_v4());
        machine.begin();
        machine.handle_remote(RemoteEvent::InitCompleted { created: true });
        assert!(machine.startup_timer_armed());

        machine.handle_remote(RemoteEvent::Pushed(None));
        assert!(machine.startup_timer_armed());
        assert_eq!(machine.phase(), Phase::AwaitingRemote);

        machine.startup_timed_out();
        let p = machine.projection();
        assert_eq!(p.phase, Phase::Ready);
        assert_eq!(p.roster, vec!["a", "b"]);
        assert!(!machine.startup_timer_armed());
    }

    #[test]
    fn timeout_seeds_default_roster() {
        let mut machine = SessionMachine::new(&config(&["a", "b", "c"]), Uuid::new_v4());
        machine.begin();
        machine.startup_timed_out();
        let p = machine.projection();
        assert_eq!(p.phase, Phase::Ready);
        assert_eq!(p.roster, vec!["a", "b", "c"]);
        assert!(p.drawn_set.is_empty());
        assert!(!p.is_awaiting_remote());
    }

    #[test]
    fn startup_failure_seeds_immediately() {
        let mut machine = SessionMachine::new(&config(&["a"]), Uuid::new_v4());
        machine.begin();
        machine.handle_remote(RemoteEvent::Failed(SyncError::RemoteUnavailable {
            operation: "read",
            message: "offline".into(),
        }));
        assert_eq!(machine.phase(), Phase::Ready);
        assert_eq!(machine.projection().roster, vec!["a"]);
    }

    #[test]
    fn timeout_after_ready_is_ignored() {
        let mut machine = ready_machine(&["a", "b"]);
        machine.draw();
        machine.startup_timed_out();
        assert_eq!(machine.projection().drawn_set, vec!["a"]);
    }

    #[test]
    fn draws_exhaust_the_roster_exactly_once() {
        let roster = ["a", "b", "c", "d"];
        let mut machine = ready_machine(&roster);
        let mut drawn = Vec::new();
        for _ in 0..roster.len() {
            let decision = machine.draw();
            let selection = decision.outcome.selection().cloned().expect("a draw");
            assert!(decision.push.is_some());
            drawn.push(selection.identifier);
            assert_invariants(&machine);
        }
        drawn.sort();
        assert_eq!(drawn, vec!["a", "b", "c", "d"]);

        let before = machine.projection();
        let decision = machine.draw();
        assert_eq!(decision.outcome, Outcome::NoOp(NoOpReason::NothingToDraw));
        assert!(decision.push.is_none());
        assert_eq!(machine.projection(), before);
    }

    #[test]
    fn last_item_is_drawn_without_spin() {
        let mut machine = ready_machine(&["a", "b"]);
        match machine.draw().outcome {
            Outcome::Drawn { spin, .. } => assert_eq!(spin.map(|s| s.wheel_index), Some(0)),
            other => panic!("unexpected {other:?}"),
        }
        match machine.draw().outcome {
            Outcome::Drawn { selection, spin } => {
                assert_eq!(selection.identifier, "b");
                assert_eq!(spin, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn drawn_set_is_most_recent_first_and_roster_stays_fixed() {
        let mut machine = ready_machine(&["a", "b", "c"]);
        machine.draw();
        machine.draw();
        let p = machine.projection();
        assert_eq!(p.drawn_set, vec!["b", "a"]);
        assert_eq!(p.roster, vec!["a", "b", "c"]);
        assert_eq!(p.remaining(), vec!["c"]);
    }

    #[test]
    fn undo_restores_pre_draw_state_once() {
        let mut machine = ready_machine(&["a", "b", "c"]);
        machine.draw();
        let before = machine.projection();

        machine.draw();
        assert!(machine.projection().can_undo);
        let decision = machine.undo();
        assert_eq!(decision.outcome, Outcome::Undone);
        let restored = decision.push.expect("undo pushes");
        assert_eq!(restored.drawn_set, before.drawn_set);

        let after = machine.projection();
        assert_eq!(after.drawn_set, before.drawn_set);
        assert_eq!(after.roster, before.roster);
        assert!(!after.can_undo);

        let again = machine.undo();
        assert_eq!(again.outcome, Outcome::NoOp(NoOpReason::NothingToUndo));
        assert!(again.push.is_none());
    }

    #[test]
    fn undo_clears_selection_even_after_an_earlier_draw() {
        let mut machine = ready_machine(&["a", "b", "c"]);
        machine.draw();
        machine.draw();
        assert!(machine.projection().current_selection.is_some());

        let pushed = machine.undo().push.expect("undo pushes");
        assert_eq!(pushed.current_selection, None);
        let p = machine.projection();
        assert_eq!(p.drawn_set, vec!["a"]);
        assert_eq!(p.current_selection, None);
        assert!(!p.celebrating);
    }

    #[test]
    fn undo_of_first_draw_clears_selection() {
        let mut machine = ready_machine(&["a", "b"]);
        machine.draw();
        machine.undo();
        let p = machine.projection();
        assert!(p.drawn_set.is_empty());
        assert_eq!(p.current_selection, None);
        assert!(!p.celebrating);
    }

    #[test]
    fn reset_always_returns_to_canonical() {
        let mut machine = ready_machine(&["a", "b", "c"]);
        machine.handle_remote(foreign(SessionDocument {
            initialized: true,
            roster: vec!["x".into(), "y".into()],
            drawn_set: vec!["y".into()],
            ..SessionDocument::default()
        }));
        let decision = machine.reset();
        assert_eq!(decision.outcome, Outcome::Reset);
        let pushed = decision.push.expect("reset pushes");
        assert_eq!(pushed.roster, vec!["a", "b", "c"]);
        assert!(pushed.drawn_set.is_empty());
        assert!(pushed.initialized);

        let p = machine.projection();
        assert!(p.drawn_set.is_empty());
        assert_eq!(p.current_selection, None);
        assert!(!p.can_undo);
    }

    #[test]
    fn foreign_push_replaces_projection_and_clears_undo() {
        let mut machine = ready_machine(&["a", "b", "c"]);
        machine.draw();
        assert!(machine.projection().can_undo);

        machine.handle_remote(foreign(SessionDocument {
            initialized: true,
            roster: vec!["a".into(), "b".into(), "c".into()],
            drawn_set: vec!["c".into()],
            current_selection: Some(Selection {
                identifier: "c".into(),
                display_image: "/images/c.png".into(),
            }),
            revision: 9,
            writer: None,
        }));

        let p = machine.projection();
        assert_eq!(p.drawn_set, vec!["c"]);
        assert_eq!(p.current_selection.map(|s| s.identifier).as_deref(), Some("c"));
        assert_eq!(p.revision, 9);
        assert!(!p.can_undo);
        assert!(p.celebrating);
    }

    #[test]
    fn own_echo_keeps_undo() {
        let mut machine = ready_machine(&["a", "b", "c"]);
        let pushed = machine.draw().push.unwrap();
        machine.handle_remote(RemoteEvent::Pushed(Some(pushed)));
        assert!(machine.projection().can_undo);
    }

    #[test]
    fn stale_own_echo_does_not_roll_back() {
        let mut machine = ready_machine(&["a", "b", "c"]);
        let first = machine.draw().push.unwrap();
        let second = machine.draw().push.unwrap();

        machine.handle_remote(RemoteEvent::Pushed(Some(first)));
        assert_eq!(machine.projection().drawn_set, vec!["b", "a"]);

        machine.handle_remote(RemoteEvent::Pushed(Some(second)));
        let p = machine.projection();
        assert_eq!(p.drawn_set, vec!["b", "a"]);
        assert!(p.can_undo);
    }

    #[test]
    fn invalid_push_is_tolerated() {
        let mut machine = ready_machine(&["a", "b"]);
        machine.handle_remote(foreign(SessionDocument {
            initialized: true,
            roster: vec!["a".into(), "b".into()],
            drawn_set: vec!["ghost".into(), "a".into(), "a".into()],
            ..SessionDocument::default()
        }));
        assert_eq!(machine.projection().drawn_set, vec!["a"]);
        assert_invariants(&machine);

        machine.handle_remote(foreign(SessionDocument::default()));
        let p = machine.projection();
        assert!(p.roster.is_empty());
        assert_eq!(machine.draw().outcome, Outcome::NoOp(NoOpReason::NothingToDraw));
    }

    #[test]
    fn absent_push_changes_nothing() {
        let mut machine = ready_machine(&["a", "b"]);
        machine.draw();
        let before = machine.projection();
        machine.handle_remote(RemoteEvent::Pushed(None));
        assert_eq!(machine.projection(), before);
    }

    #[test]
    fn priority_order_drives_draws() {
        let mut cfg = config(&["a", "b", "c"]);
        cfg.priority = vec!["c".into(), "a".into()];
        let mut machine = SessionMachine::new(&cfg, Uuid::new_v4());
        machine.begin();
        machine.startup_timed_out();

        let order: Vec<String> = (0..3)
            .filter_map(|_| machine.draw().outcome.selection().map(|s| s.identifier.clone()))
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn dismiss_hides_but_keeps_selection() {
        let mut machine = ready_machine(&["a", "b"]);
        let epoch = machine.celebration_epoch();
        machine.draw();
        assert!(machine.celebrating());
        assert_eq!(machine.celebration_epoch(), epoch + 1);

        let decision = machine.dismiss();
        assert_eq!(decision.outcome, Outcome::Dismissed);
        assert!(decision.push.is_none());
        assert!(!machine.celebrating());
        assert!(machine.projection().current_selection.is_some());
    }

    #[test]
    fn pushes_carry_writer_and_increasing_revisions() {
        let client = Uuid::new_v4();
        let mut machine = SessionMachine::new(&config(&["a", "b", "c"]), client);
        machine.begin();
        machine.startup_timed_out();
        let first = machine.draw().push.unwrap();
        let second = machine.undo().push.unwrap();
        assert_eq!(first.writer, Some(client));
        assert!(second.revision > first.revision);
        assert!(first.initialized && second.initialized);
    }
}
