//! In-memory fakes for driving the orchestrator without a network.
//!
//! `EnvState` is the single source of truth: a team table, a user table, and
//! recorders for everything the engine sends outward (posts, lease traffic,
//! notifications). The fake authorities all point at the same `EnvState`, so
//! tests can stage a world, run an operation, and assert on what crossed the
//! wire. Posted links are NOT applied back to the team table; tests that
//! need the server's effect visible mutate the table explicitly.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use cohort_core::{
    AdminLogPoint, Application, ChainState, ConfirmUi, DeleteKind, DowngradeLease,
    FreshnessAnchor, FreshnessPurpose, Generation, GenerationSecret, Invite, LeaseAuthority,
    LeaseId, LinkId, LoadArgs, MemberLookup, Notifier, Operator, PostAuthority, ReaderKeyMasks,
    ResolvedUser, Role, SeqType, Seqno, Services, SigPayload, Team, TeamChangeSet, TeamError,
    TeamId, TeamKeyManager, TeamLoader, TeamName, UserId, UserResolution, UserResolver,
    UserVersion,
};
use ed25519_dalek::SigningKey;
use rand::{SeedableRng, rngs::StdRng};
use x25519_dalek::{PublicKey, StaticSecret};

/// Chain state served by the fake loader, fully scriptable.
#[derive(Clone)]
pub struct FakeChain {
    pub team_id: TeamId,
    pub name: String,
    pub public: bool,
    pub implicit: bool,
    pub open: bool,
    pub parent: Option<TeamId>,
    pub generation: Generation,
    pub seqno: Seqno,
    pub link_id: LinkId,
    pub members: Vec<(UserVersion, Role)>,
    pub admin_points: Vec<UserVersion>,
    pub subteams: Vec<TeamId>,
    pub invites: Vec<Invite>,
}

impl FakeChain {
    pub fn root(tag: u8, name: &str) -> Self {
        Self {
            team_id: TeamId([tag; 16]),
            name: name.to_string(),
            public: false,
            implicit: false,
            open: false,
            parent: None,
            generation: Generation(1),
            seqno: 1,
            link_id: LinkId([tag; 32]),
            members: Vec::new(),
            admin_points: Vec::new(),
            subteams: Vec::new(),
            invites: Vec::new(),
        }
    }

    pub fn subteam_of(tag: u8, name: &str, parent: TeamId) -> Self {
        Self { parent: Some(parent), ..Self::root(tag, name) }
    }

    pub fn with_member(mut self, version: UserVersion, role: Role) -> Self {
        self.members.push((version, role));
        self
    }

    /// Grant `version` an admin log point in this chain.
    pub fn with_admin_point(mut self, version: UserVersion) -> Self {
        self.admin_points.push(version);
        self
    }

    pub fn with_subteam(mut self, id: TeamId) -> Self {
        self.subteams.push(id);
        self
    }

    pub fn with_implicit(mut self) -> Self {
        self.implicit = true;
        self
    }
}

impl ChainState for FakeChain {
    fn team_id(&self) -> TeamId {
        self.team_id
    }
    fn name(&self) -> TeamName {
        TeamName(self.name.clone())
    }
    fn is_public(&self) -> bool {
        self.public
    }
    fn is_implicit(&self) -> bool {
        self.implicit
    }
    fn is_open(&self) -> bool {
        self.open
    }
    fn parent_id(&self) -> Option<TeamId> {
        self.parent
    }
    fn latest_generation(&self) -> Generation {
        self.generation
    }
    fn latest_seqno(&self) -> Seqno {
        self.seqno
    }
    fn latest_link_id(&self) -> LinkId {
        self.link_id
    }
    fn user_role(&self, user: &UserVersion) -> Role {
        self.members.iter().find(|(v, _)| v == user).map_or(Role::None, |(_, r)| *r)
    }
    fn members(&self) -> Vec<(UserVersion, Role)> {
        self.members.clone()
    }
    fn user_version_by_uid(&self, uid: UserId) -> Option<UserVersion> {
        self.members.iter().find(|(v, _)| v.uid == uid).map(|(v, _)| *v)
    }
    fn admin_log_point(&self, user: &UserVersion) -> Option<AdminLogPoint> {
        self.admin_points.contains(user).then(|| AdminLogPoint {
            team_id: self.team_id,
            seqno: 1,
            seq_type: SeqType::for_publicness(self.public),
        })
    }
    fn subteams(&self) -> Vec<TeamId> {
        self.subteams.clone()
    }
    fn active_invites(&self) -> Vec<Invite> {
        self.invites.clone()
    }
}

/// One team as the fake server knows it.
pub struct FakeTeamState {
    pub chain: FakeChain,
    pub seeds: Vec<[u8; 32]>,
}

/// One account as the fake server knows it.
pub struct FakeUser {
    pub version: UserVersion,
    pub has_usable_key: bool,
    pub resolve_error: bool,
}

/// Shared world state behind all fake authorities.
#[derive(Default)]
pub struct EnvState {
    pub teams: Mutex<HashMap<TeamId, FakeTeamState>>,
    pub users: Mutex<HashMap<UserId, FakeUser>>,
    pub posted: Mutex<Vec<SigPayload>>,
    /// Number of posts to reject with `StaleSequence` before accepting.
    pub stale_failures: AtomicU32,
    pub lease_requests: Mutex<Vec<Vec<UserId>>>,
    pub lease_cancels: Mutex<Vec<LeaseId>>,
    pub notifications: Mutex<Vec<(TeamId, Seqno, TeamChangeSet)>>,
    pub anchor_seqno: AtomicU64,
    /// When set, the freshness authority reports no anchor available.
    pub no_anchor: AtomicBool,
}

/// Deterministic per-user device keys.
pub fn user_keys(tag: u8) -> (SigningKey, StaticSecret) {
    let mut rng = StdRng::seed_from_u64(u64::from(tag));
    (SigningKey::generate(&mut rng), StaticSecret::random_from_rng(&mut rng))
}

struct FakeLoader {
    env: Arc<EnvState>,
    services: OnceLock<Services>,
}

#[async_trait]
impl TeamLoader for FakeLoader {
    async fn load(&self, args: LoadArgs) -> Result<Team, TeamError> {
        let teams = self.env.teams.lock().unwrap();
        let state = teams
            .get(&args.id)
            .ok_or_else(|| TeamError::Service(format!("unknown team {}", args.id)))?;

        let seeds = state.seeds.iter().copied().map(GenerationSecret::from_bytes).collect();
        let keys = TeamKeyManager::from_seeds(args.id, seeds)?;

        // Serve masks for every application over a window wide enough to
        // survive a few rotations.
        let mut masks = ReaderKeyMasks::default();
        for app in [
            Application::Kbfs,
            Application::Chat,
            Application::Saltpack,
            Application::GitMetadata,
        ] {
            for g in 1..=(state.seeds.len() as u32 + 3) {
                masks.insert(app, Generation(g), vec![g as u8; 32]);
            }
        }

        let services = self
            .services
            .get()
            .ok_or_else(|| TeamError::Service("loader not wired".into()))?
            .clone();
        Ok(Team::new(Arc::new(state.chain.clone()), keys, masks, services))
    }
}

struct FakeResolver {
    env: Arc<EnvState>,
}

#[async_trait]
impl UserResolver for FakeResolver {
    async fn lookup(&self, version: &UserVersion) -> Result<MemberLookup, TeamError> {
        let users = self.env.users.lock().unwrap();
        let user = users
            .get(&version.uid)
            .ok_or_else(|| TeamError::Resolve(format!("unknown user {}", version.uid)))?;
        if user.version.eldest_seqno != version.eldest_seqno {
            return Ok(MemberLookup::Reset { current_eldest: user.version.eldest_seqno });
        }
        let (_, encryption) = user_keys(version.uid.0[0]);
        Ok(MemberLookup::Active(ResolvedUser {
            version: *version,
            encryption_key: PublicKey::from(&encryption).to_bytes(),
        }))
    }

    async fn resolve_uid(&self, uid: UserId) -> Result<UserResolution, TeamError> {
        let users = self.env.users.lock().unwrap();
        let user =
            users.get(&uid).ok_or_else(|| TeamError::Resolve(format!("unknown user {uid}")))?;
        if user.resolve_error {
            return Err(TeamError::Resolve(format!("transient failure resolving {uid}")));
        }
        if !user.has_usable_key {
            return Ok(UserResolution::InviteRequired { version: user.version });
        }
        let (_, encryption) = user_keys(uid.0[0]);
        Ok(UserResolution::Resolved(ResolvedUser {
            version: user.version,
            encryption_key: PublicKey::from(&encryption).to_bytes(),
        }))
    }
}

struct FakeFreshness {
    env: Arc<EnvState>,
}

#[async_trait]
impl cohort_core::FreshnessAuthority for FakeFreshness {
    async fn fetch_anchor(
        &self,
        _purpose: FreshnessPurpose,
    ) -> Result<Option<FreshnessAnchor>, TeamError> {
        if self.env.no_anchor.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let seqno = self.env.anchor_seqno.fetch_add(1, Ordering::SeqCst) + 1000;
        Ok(Some(FreshnessAnchor { seqno, root_hash: [7; 32] }))
    }
}

struct FakeLeases {
    env: Arc<EnvState>,
}

#[async_trait]
impl LeaseAuthority for FakeLeases {
    async fn request_lease(
        &self,
        _team_id: TeamId,
        uids: &[UserId],
    ) -> Result<(DowngradeLease, FreshnessAnchor), TeamError> {
        self.env.lease_requests.lock().unwrap().push(uids.to_vec());
        Ok((
            DowngradeLease { id: LeaseId([0xEE; 16]), uids: uids.to_vec() },
            FreshnessAnchor { seqno: 5000, root_hash: [8; 32] },
        ))
    }

    async fn cancel_lease(&self, id: LeaseId) -> Result<(), TeamError> {
        self.env.lease_cancels.lock().unwrap().push(id);
        Ok(())
    }
}

struct FakePoster {
    env: Arc<EnvState>,
}

#[async_trait]
impl PostAuthority for FakePoster {
    async fn post(&self, payload: &SigPayload) -> Result<(), TeamError> {
        if self.env.stale_failures.load(Ordering::SeqCst) > 0 {
            self.env.stale_failures.fetch_sub(1, Ordering::SeqCst);
            let seqno = payload.sigs.first().map_or(0, |sig| sig.seqno);
            return Err(TeamError::StaleSequence { seqno });
        }
        self.env.posted.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

struct FakeNotifier {
    env: Arc<EnvState>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(
        &self,
        team_id: TeamId,
        _name: TeamName,
        next_seqno: Seqno,
        _implicit: bool,
        changes: TeamChangeSet,
    ) {
        self.env.notifications.lock().unwrap().push((team_id, next_seqno, changes));
    }
}

/// Confirmation prompt with a scripted answer.
pub struct ScriptedConfirm {
    pub answer: bool,
    pub asked: Mutex<Vec<(DeleteKind, TeamName)>>,
}

impl ScriptedConfirm {
    pub fn answering(answer: bool) -> Self {
        Self { answer, asked: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ConfirmUi for ScriptedConfirm {
    async fn confirm_delete(&self, kind: DeleteKind, name: &TeamName) -> Result<bool, TeamError> {
        self.asked.lock().unwrap().push((kind, name.clone()));
        Ok(self.answer)
    }
}

/// A staged world plus the services wired against it.
pub struct Harness {
    pub env: Arc<EnvState>,
    pub services: Services,
}

pub fn harness() -> Harness {
    let env = Arc::new(EnvState::default());
    let loader = Arc::new(FakeLoader { env: Arc::clone(&env), services: OnceLock::new() });
    let services = Services {
        loader: Arc::clone(&loader) as Arc<dyn TeamLoader>,
        resolver: Arc::new(FakeResolver { env: Arc::clone(&env) }),
        freshness: Arc::new(FakeFreshness { env: Arc::clone(&env) }),
        leases: Arc::new(FakeLeases { env: Arc::clone(&env) }),
        poster: Arc::new(FakePoster { env: Arc::clone(&env) }),
        notifier: Arc::new(FakeNotifier { env: Arc::clone(&env) }),
    };
    let _ = loader.services.set(services.clone());
    Harness { env, services }
}

impl Harness {
    /// Register a live account; its uid and keys derive from `tag`.
    pub fn register_user(&self, tag: u8) -> UserVersion {
        let version = UserVersion { uid: UserId([tag; 16]), eldest_seqno: 1 };
        self.env.users.lock().unwrap().insert(
            version.uid,
            FakeUser { version, has_usable_key: true, resolve_error: false },
        );
        version
    }

    /// Register an account that has no usable public key yet.
    pub fn register_keyless_user(&self, tag: u8) -> UserVersion {
        let version = UserVersion { uid: UserId([tag; 16]), eldest_seqno: 1 };
        self.env.users.lock().unwrap().insert(
            version.uid,
            FakeUser { version, has_usable_key: false, resolve_error: false },
        );
        version
    }

    /// Reset an account: bump its server-side eldest seqno.
    pub fn reset_user(&self, version: UserVersion) {
        if let Some(user) = self.env.users.lock().unwrap().get_mut(&version.uid) {
            user.version.eldest_seqno += 1;
        }
    }

    /// Stage a team with deterministic seeds for generations 1..=n.
    pub fn insert_team(&self, chain: FakeChain, generations: u32) {
        let seeds = (1..=generations).map(|g| [g as u8; 32]).collect();
        let mut chain = chain;
        chain.generation = Generation(generations);
        self.env.teams.lock().unwrap().insert(chain.team_id, FakeTeamState { chain, seeds });
    }

    /// Mutate a staged team, simulating the server applying a link.
    pub fn update_team(&self, id: TeamId, f: impl FnOnce(&mut FakeTeamState)) {
        let mut teams = self.env.teams.lock().unwrap();
        if let Some(state) = teams.get_mut(&id) {
            f(state);
        }
    }

    pub async fn load_team(&self, id: TeamId) -> Team {
        self.services
            .loader
            .load(LoadArgs { id, public: false, force_repoll: false, need_admin: false })
            .await
            .expect("staged team loads")
    }

    /// An operator whose device keys match the registered user's.
    pub fn operator(&self, version: UserVersion) -> Operator {
        let (signing, encryption) = user_keys(version.uid.0[0]);
        Operator::new(version, signing, encryption)
    }

    pub fn posted(&self) -> Vec<SigPayload> {
        self.env.posted.lock().unwrap().clone()
    }

    pub fn lease_requests(&self) -> Vec<Vec<UserId>> {
        self.env.lease_requests.lock().unwrap().clone()
    }

    pub fn lease_cancels(&self) -> Vec<LeaseId> {
        self.env.lease_cancels.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<(TeamId, Seqno, TeamChangeSet)> {
        self.env.notifications.lock().unwrap().clone()
    }

    /// The device encryption public key registered for `tag`.
    pub fn device_encryption_pk(&self, tag: u8) -> [u8; 32] {
        let (_, encryption) = user_keys(tag);
        PublicKey::from(&encryption).to_bytes()
    }
}
