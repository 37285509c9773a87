//! Cohort team mutation and key-lifecycle engine.
//!
//! Manages the cryptographic and consensus state of a *team*: a named,
//! role-structured group whose membership and shared secrets evolve through
//! signed, server-ordered sigchain links. The engine derives and rotates
//! per-application keys from generation-indexed seeds, computes who must
//! receive new key material when membership changes, builds and signs
//! state-transition links against a freshness anchor, and coordinates the
//! downgrade-lease protocol that keeps concurrent admin removals safe.
//!
//! # Architecture
//!
//! [`Team`] is the façade: one loaded snapshot driving each operation
//! through the same pipeline.
//!
//! ```text
//! Team operation
//!   ├─ member_set   resolve the change: recipients + downgrade set
//!   ├─ keys         derive / rotate seeds, box them per recipient
//!   ├─ link         assemble section, sign (outer + reverse), precheck
//!   ├─ lease        downgrade lease around privilege-reducing posts
//!   └─ retry        bounded retry on the stale-sequence condition
//! ```
//!
//! Everything network-facing sits behind the async seams in [`service`]:
//! snapshot loading, identity resolution, freshness anchors, leases,
//! posting, notifications, and delete confirmation. The sigchain reducer
//! that folds links into [`chain::ChainState`] lives outside this crate.
//!
//! # Concurrency
//!
//! A snapshot is not safe for concurrent mutation: serialize operations per
//! snapshot or load one snapshot per concurrent operation. The downgrade
//! lease is the only cross-client lock; every other conflict resolves
//! through server-side sequence rejection plus client retry.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod chain;
pub mod error;
pub mod invite;
pub mod keys;
pub mod lease;
pub mod link;
pub mod member_set;
pub mod operator;
pub mod retry;
pub mod service;
pub mod team;
pub mod types;

pub use chain::ChainState;
pub use error::TeamError;
pub use invite::{InviteEntry, InviteSection, SeitanInvite, generate_seitan_invite};
pub use keys::{BoxBatch, GenerationSecret, PerTeamKeySection, ReaderKeyMasks, TeamKeyManager};
pub use lease::with_downgrade_lease;
pub use link::{
    AdminSection, LinkBody, LinkType, MembersSection, PayloadArgs, SigPayload, SignedLink,
    TeamSection, sig_payload, sig_team_item,
};
pub use member_set::{ChangeRequest, Member, MemberSet};
pub use operator::Operator;
pub use retry::retry_on_stale_sequence;
pub use service::{
    ConfirmUi, DeleteKind, FreshnessAuthority, LeaseAuthority, LoadArgs, MemberLookup, Notifier,
    PostAuthority, ResolvedUser, Services, TeamLoader, UserResolution, UserResolver,
};
pub use team::{
    AddMemberResult, AddedUser, Disposition, Invitee, SkipReason, TargetOutcome, Team,
    add_members_best_effort,
};
pub use types::{
    AdminLogPoint, Application, ApplicationKey, DowngradeLease, Entropy, FreshnessAnchor,
    FreshnessPurpose, Generation, Invite, InviteId, InviteType, LeaseId, LinkId, Role, SeqType,
    Seqno, TeamChangeSet, TeamId, TeamName, TeamSettings, UserId, UserVersion,
};
