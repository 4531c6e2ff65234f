//! End-to-end tests for the assignment service, resolver and hierarchy
//! against in-memory SurrealDB.

use std::sync::{Arc, Mutex};

use gestor_core::error::{GestorError, GestorResult, IntegrityViolation};
use gestor_core::hierarchy::FamilyTreeNode;
use gestor_core::models::audit::{
    Actor, AuditAction, AuditLogEntry, AuditOutcome, CreateAuditLogEntry,
};
use gestor_core::models::family::{CreateFamily, Family};
use gestor_core::models::permission::{CreatePermission, Permission};
use gestor_core::models::user::{CreateUser, UpdateUser, User, UserAssignments};
use gestor_core::models::version::ConcurrencyToken;
use gestor_core::repository::{
    AuditLogFilter, AuditLogRepository, FamilyRepository, PaginatedResult, Pagination,
    PermissionRepository, UserRepository,
};
use gestor_core::{AssignmentService, CycleValidator, EffectivePermissionResolver, FamilyHierarchy};
use gestor_db::repository::{
    SurrealAuditLogRepository, SurrealFamilyRepository, SurrealPermissionRepository,
    SurrealUserRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

type Users = SurrealUserRepository<Db>;
type Families = SurrealFamilyRepository<Db>;
type Audit = SurrealAuditLogRepository<Db>;

struct Fixture {
    users: Users,
    families: Families,
    permissions: SurrealPermissionRepository<Db>,
    audit: Audit,
    service: AssignmentService<Users, Families, Audit>,
    resolver: EffectivePermissionResolver<Users, Families>,
    hierarchy: FamilyHierarchy<Families>,
    actor: Actor,
}

async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    gestor_db::run_migrations(&db).await.unwrap();

    let users = SurrealUserRepository::new(db.clone());
    let families = SurrealFamilyRepository::new(db.clone());
    let permissions = SurrealPermissionRepository::new(db.clone());
    let audit = SurrealAuditLogRepository::new(db);
    let hierarchy = FamilyHierarchy::new(families.clone());

    Fixture {
        service: AssignmentService::new(users.clone(), hierarchy.clone(), audit.clone()),
        resolver: EffectivePermissionResolver::new(users.clone(), hierarchy.clone()),
        hierarchy,
        users,
        families,
        permissions,
        audit,
        actor: Actor {
            user_id: Uuid::new_v4(),
            login_name: "admin".into(),
        },
    }
}

impl Fixture {
    async fn user(&self, login: &str) -> User {
        self.users
            .create(CreateUser {
                display_name: login.into(),
                login_name: login.into(),
                password_hash: "hash".into(),
            })
            .await
            .unwrap()
    }

    async fn family(&self, name: &str) -> Family {
        self.families
            .create(CreateFamily {
                name: name.into(),
                description: None,
            })
            .await
            .unwrap()
    }

    async fn permission(&self, name: &str) -> Permission {
        self.permissions
            .create(CreatePermission {
                name: name.into(),
                form_id: format!("frm{name}"),
            })
            .await
            .unwrap()
    }

    async fn token(&self, family_id: Uuid) -> ConcurrencyToken {
        self.families.get_by_id(family_id).await.unwrap().version
    }

    async fn grant(&self, family_id: Uuid, permission_ids: &[Uuid]) {
        let token = self.token(family_id).await;
        self.service
            .assign_permissions_to_family(&self.actor, family_id, permission_ids, token)
            .await
            .unwrap();
    }

    async fn parents(&self, family_id: Uuid, parent_ids: &[Uuid]) {
        let token = self.token(family_id).await;
        self.service
            .set_family_relations(&self.actor, family_id, parent_ids, &[], token)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn permissions_roll_up_from_children() {
    let fx = setup().await;
    let a = fx.family("A").await;
    let b = fx.family("B").await;
    let c = fx.family("C").await;
    fx.parents(b.id, &[a.id]).await;
    fx.parents(c.id, &[b.id]).await;

    let p1 = fx.permission("P1").await;
    let p2 = fx.permission("P2").await;
    let p3 = fx.permission("P3").await;
    fx.grant(c.id, &[p1.id]).await;
    fx.grant(a.id, &[p2.id]).await;

    let u = fx.user("u").await;
    let token = fx
        .service
        .assign_permissions_to_user(&fx.actor, u.id, &[p3.id], u.version)
        .await
        .unwrap();
    fx.service
        .assign_families_to_user(&fx.actor, u.id, &[b.id], token)
        .await
        .unwrap();

    let effective = fx.resolver.compute_effective(u.id).await.unwrap();
    let names: Vec<&str> = effective
        .iter()
        .map(|e| e.permission.name.as_str())
        .collect();
    assert_eq!(names, vec!["P1", "P3"], "P2 sits on an ancestor of B");

    assert!(effective[0].is_inherited);
    assert_eq!(effective[0].family_names(), vec!["B"]);
    assert!(effective[1].is_direct);
    assert_eq!(effective[1].origin_description(), "Direct");

    let family_set = fx.resolver.compute_effective_for_family(a.id).await.unwrap();
    assert_eq!(family_set.len(), 2);
}

#[tokio::test]
async fn emptying_a_user_is_rejected_and_leaves_assignments() {
    let fx = setup().await;
    let f = fx.family("F").await;
    let p = fx.permission("P").await;
    fx.grant(f.id, &[p.id]).await;

    let u = fx.user("u").await;
    let token = fx
        .service
        .assign_families_to_user(&fx.actor, u.id, &[f.id], u.version)
        .await
        .unwrap();

    let err = fx
        .service
        .assign_families_to_user(&fx.actor, u.id, &[], token)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::NoEffectivePermissions));

    let result = fx
        .service
        .assign_permissions_to_user(&fx.actor, u.id, &[], token)
        .await;
    assert!(result.is_ok(), "families still grant P");

    let stored = fx.users.get_assignments(u.id).await.unwrap();
    assert_eq!(stored.family_ids, vec![f.id]);
}

#[tokio::test]
async fn new_user_cannot_be_given_nothing() {
    let fx = setup().await;
    let u = fx.user("u").await;

    let err = fx
        .service
        .assign_families_to_user(&fx.actor, u.id, &[], u.version)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::NoEffectivePermissions));

    let err = fx
        .service
        .assign_permissions_to_user(&fx.actor, u.id, &[], u.version)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::NoEffectivePermissions));

    let stored = fx.users.get_by_id(u.id).await.unwrap();
    assert_eq!(stored.version, u.version);
}

#[tokio::test]
async fn stale_token_is_a_conflict() {
    let fx = setup().await;
    let p = fx.permission("P").await;
    let q = fx.permission("Q").await;
    let u = fx.user("u").await;

    fx.service
        .assign_permissions_to_user(&fx.actor, u.id, &[p.id], u.version)
        .await
        .unwrap();

    let err = fx
        .service
        .assign_permissions_to_user(&fx.actor, u.id, &[q.id], u.version)
        .await
        .unwrap_err();
    assert!(matches!(err, GestorError::ConcurrencyConflict { .. }));

    let stored = fx.users.get_assignments(u.id).await.unwrap();
    assert_eq!(stored.permission_ids, vec![p.id]);
}

#[tokio::test]
async fn stale_token_at_storage_layer_is_a_conflict() {
    let fx = setup().await;
    let p = fx.permission("P").await;
    let u = fx.user("u").await;
    let revision = fx.families.load_graph().await.unwrap().revision();

    let err = fx
        .users
        .replace_permissions(u.id, &[p.id], u.version.next(), revision)
        .await
        .unwrap_err();
    assert!(matches!(err, GestorError::ConcurrencyConflict { .. }));
    assert!(fx.users.get_permissions(u.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn graph_change_after_validation_is_a_conflict() {
    let fx = setup().await;
    let f = fx.family("F").await;
    let p = fx.permission("P").await;
    let u = fx.user("u").await;

    // Validated against this revision...
    let validated = fx.families.load_graph().await.unwrap().revision();
    // ...then another writer changes the graph.
    fx.grant(f.id, &[p.id]).await;

    let err = fx
        .users
        .replace_families(u.id, &[f.id], u.version, validated)
        .await
        .unwrap_err();
    assert!(matches!(err, GestorError::ConcurrencyConflict { .. }));
    assert!(fx.users.get_families(u.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn assigned_families_read_back_exactly() {
    let fx = setup().await;
    let mut ids = Vec::new();
    for name in ["Compras", "Ventas", "Deposito"] {
        let f = fx.family(name).await;
        let p = fx.permission(&format!("P{name}")).await;
        fx.grant(f.id, &[p.id]).await;
        ids.push(f.id);
    }
    let u = fx.user("u").await;

    let token = fx
        .service
        .assign_families_to_user(&fx.actor, u.id, &ids, u.version)
        .await
        .unwrap();
    assert_eq!(token, u.version.next());

    let mut read: Vec<Uuid> = fx
        .service
        .get_user_families(u.id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    read.sort();
    ids.sort();
    assert_eq!(read, ids);

    // Full replace: dropping one family removes exactly that one.
    fx.service
        .assign_families_to_user(&fx.actor, u.id, &ids[..1], token)
        .await
        .unwrap();
    let read = fx.service.get_user_families(u.id).await.unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].id, ids[0]);
}

#[tokio::test]
async fn cycles_are_rejected() {
    let fx = setup().await;
    let a = fx.family("A").await;
    let b = fx.family("B").await;
    let c = fx.family("C").await;
    fx.parents(b.id, &[a.id]).await;
    fx.parents(c.id, &[b.id]).await;

    // A keeps B as its child, so C stays below A.
    let token = fx.token(a.id).await;
    let err = fx
        .service
        .set_family_relations(&fx.actor, a.id, &[c.id], &[b.id], token)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::CircularReference));

    let err = fx
        .service
        .set_family_relations(&fx.actor, a.id, &[a.id], &[], token)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::CircularReference));

    let err = fx
        .service
        .set_family_relations(&fx.actor, a.id, &[], &[a.id], token)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::InvalidHierarchy));

    let validator = CycleValidator::new(fx.hierarchy.clone());
    assert!(validator.would_create_cycle(c.id, &[a.id]).await.unwrap());
    assert!(!validator.would_create_cycle(a.id, &[]).await.unwrap());

    // Nothing was written.
    assert!(fx.hierarchy.get_ancestors(a.id).await.unwrap().is_empty());
    assert_eq!(fx.token(a.id).await, token);
}

#[tokio::test]
async fn family_edit_that_strands_a_member_is_rejected() {
    let fx = setup().await;
    let parent = fx.family("Padre").await;
    let child = fx.family("Hija").await;
    fx.parents(child.id, &[parent.id]).await;
    let p = fx.permission("P").await;
    fx.grant(child.id, &[p.id]).await;

    let u = fx.user("u").await;
    fx.service
        .assign_families_to_user(&fx.actor, u.id, &[parent.id], u.version)
        .await
        .unwrap();

    // Detaching the only child that carries P would leave the user empty.
    let token = fx.token(parent.id).await;
    let err = fx
        .service
        .set_family_relations(&fx.actor, parent.id, &[], &[], token)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::NoEffectivePermissions));

    // So would revoking P from the child.
    let token = fx.token(child.id).await;
    let err = fx
        .service
        .assign_permissions_to_family(&fx.actor, child.id, &[], token)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::NoEffectivePermissions));

    assert_eq!(fx.resolver.compute_effective(u.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_and_unknown_ids_are_rejected() {
    let fx = setup().await;
    let p = fx.permission("P").await;
    let u = fx.user("u").await;

    let err = fx
        .service
        .assign_permissions_to_user(&fx.actor, u.id, &[p.id, p.id], u.version)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::DuplicatePermission));

    let err = fx
        .service
        .assign_families_to_user(&fx.actor, u.id, &[Uuid::new_v4()], u.version)
        .await
        .unwrap_err();
    assert!(matches!(err, GestorError::NotFound { ref entity, .. } if entity == "family"));

    let err = fx
        .service
        .assign_permissions_to_user(&fx.actor, Uuid::new_v4(), &[p.id], u.version)
        .await
        .unwrap_err();
    assert!(matches!(err, GestorError::NotFound { ref entity, .. } if entity == "user"));
}

#[tokio::test]
async fn outcomes_are_audited() {
    let fx = setup().await;
    let p = fx.permission("P").await;
    let u = fx.user("u").await;

    fx.service
        .assign_permissions_to_user(&fx.actor, u.id, &[p.id], u.version)
        .await
        .unwrap();
    let _ = fx
        .service
        .assign_permissions_to_user(&fx.actor, u.id, &[], u.version.next())
        .await
        .unwrap_err();

    let entries = fx
        .audit
        .list(
            AuditLogFilter {
                target_id: Some(u.id),
                ..Default::default()
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(entries.total, 2);
    assert!(
        entries
            .items
            .iter()
            .all(|e| e.action == AuditAction::AssignPermissionsToUser
                && e.actor_id == Some(fx.actor.user_id))
    );

    let outcomes: Vec<AuditOutcome> = entries.items.iter().map(|e| e.outcome).collect();
    assert!(outcomes.contains(&AuditOutcome::Success));
    assert!(outcomes.contains(&AuditOutcome::Rejected));

    let rejected = entries
        .items
        .iter()
        .find(|e| e.outcome == AuditOutcome::Rejected)
        .unwrap();
    assert!(rejected.metadata["error"].is_string());
}

#[tokio::test]
async fn hierarchy_listing_nests_and_counts() {
    let fx = setup().await;
    let admin = fx.family("Administradores").await;
    let ventas = fx.family("Ventas").await;
    let compras = fx.family("Compras").await;
    fx.parents(ventas.id, &[admin.id]).await;
    let usuarios = fx.permission("Usuarios").await;
    let presupuestos = fx.permission("Presupuestos").await;
    fx.grant(admin.id, &[usuarios.id]).await;
    fx.grant(ventas.id, &[presupuestos.id]).await;

    let tree = fx.hierarchy.get_all_with_hierarchy().await.unwrap();
    let rows: Vec<(&str, usize, usize, usize)> = FamilyTreeNode::flatten(&tree)
        .iter()
        .map(|n| {
            (
                n.family.name.as_str(),
                n.depth,
                n.direct_permission_count,
                n.effective_permission_count,
            )
        })
        .collect();
    assert_eq!(
        rows,
        vec![
            ("Administradores", 0, 1, 2),
            ("Ventas", 1, 1, 1),
            ("Compras", 0, 0, 0),
        ]
    );

    let descendants = fx.hierarchy.get_descendants(admin.id).await.unwrap();
    assert_eq!(descendants.len(), 1);
    assert_eq!(descendants[0].id, ventas.id);
    let direct = fx.hierarchy.get_direct_permissions(ventas.id).await.unwrap();
    assert_eq!(direct[0].id, presupuestos.id);
    assert!(fx.hierarchy.get_ancestors(compras.id).await.unwrap().is_empty());
}

/// Audit store that rejects every write.
struct BrokenAudit;

impl AuditLogRepository for BrokenAudit {
    async fn append(&self, _input: CreateAuditLogEntry) -> GestorResult<AuditLogEntry> {
        Err(GestorError::Database("audit store offline".into()))
    }

    async fn list(
        &self,
        _filter: AuditLogFilter,
        _pagination: Pagination,
    ) -> GestorResult<PaginatedResult<AuditLogEntry>> {
        Err(GestorError::Database("audit store offline".into()))
    }
}

#[tokio::test]
async fn failed_audit_writes_do_not_change_outcomes() {
    let fx = setup().await;
    let service = AssignmentService::new(fx.users.clone(), fx.hierarchy.clone(), BrokenAudit);
    let p = fx.permission("P").await;
    let u = fx.user("u").await;

    let token = service
        .assign_permissions_to_user(&fx.actor, u.id, &[p.id], u.version)
        .await
        .unwrap();
    assert_eq!(token, u.version.next());
    assert_eq!(fx.users.get_assignments(u.id).await.unwrap().permission_ids, vec![p.id]);

    let err = service
        .assign_permissions_to_user(&fx.actor, u.id, &[], token)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::NoEffectivePermissions));
    assert_eq!(fx.users.get_assignments(u.id).await.unwrap().permission_ids, vec![p.id]);
}

/// Membership change another writer commits while a family edit is
/// between its member check and its write.
struct Interleaved {
    user_id: Uuid,
    family_id: Uuid,
}

/// User repository that runs an [`Interleaved`] change right after the
/// first affected-member lookup.
#[derive(Clone)]
struct InterleavingUsers {
    inner: Users,
    families: Families,
    pending: Arc<Mutex<Option<Interleaved>>>,
}

impl InterleavingUsers {
    /// Move the user into the family and drop its direct permissions,
    /// going straight to storage as a concurrent writer would.
    async fn run(&self, change: Interleaved) -> GestorResult<()> {
        let user = self.inner.get_by_id(change.user_id).await?;
        let revision = self.families.load_graph().await?.revision();
        let token = self
            .inner
            .replace_families(change.user_id, &[change.family_id], user.version, revision)
            .await?;
        let revision = self.families.load_graph().await?.revision();
        self.inner
            .replace_permissions(change.user_id, &[], token, revision)
            .await?;
        Ok(())
    }
}

impl UserRepository for InterleavingUsers {
    async fn create(&self, input: CreateUser) -> GestorResult<User> {
        self.inner.create(input).await
    }

    async fn get_by_id(&self, id: Uuid) -> GestorResult<User> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_login(&self, login_name: &str) -> GestorResult<User> {
        self.inner.get_by_login(login_name).await
    }

    async fn update(
        &self,
        id: Uuid,
        input: UpdateUser,
        expected: ConcurrencyToken,
    ) -> GestorResult<User> {
        self.inner.update(id, input, expected).await
    }

    async fn set_password_hash(
        &self,
        id: Uuid,
        password_hash: String,
        expected: ConcurrencyToken,
    ) -> GestorResult<User> {
        self.inner.set_password_hash(id, password_hash, expected).await
    }

    async fn delete(&self, id: Uuid, expected: ConcurrencyToken) -> GestorResult<()> {
        self.inner.delete(id, expected).await
    }

    async fn list(&self, pagination: Pagination) -> GestorResult<PaginatedResult<User>> {
        self.inner.list(pagination).await
    }

    async fn get_assignments(&self, id: Uuid) -> GestorResult<UserAssignments> {
        self.inner.get_assignments(id).await
    }

    async fn get_families(&self, id: Uuid) -> GestorResult<Vec<Family>> {
        self.inner.get_families(id).await
    }

    async fn get_permissions(&self, id: Uuid) -> GestorResult<Vec<Permission>> {
        self.inner.get_permissions(id).await
    }

    async fn list_assignments_for_families(
        &self,
        family_ids: &[Uuid],
    ) -> GestorResult<Vec<UserAssignments>> {
        let members = self.inner.list_assignments_for_families(family_ids).await?;
        let pending = self.pending.lock().unwrap().take();
        if let Some(change) = pending {
            self.run(change).await?;
        }
        Ok(members)
    }

    async fn replace_families(
        &self,
        id: Uuid,
        family_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> GestorResult<ConcurrencyToken> {
        self.inner
            .replace_families(id, family_ids, expected, graph_revision)
            .await
    }

    async fn replace_permissions(
        &self,
        id: Uuid,
        permission_ids: &[Uuid],
        expected: ConcurrencyToken,
        graph_revision: u64,
    ) -> GestorResult<ConcurrencyToken> {
        self.inner
            .replace_permissions(id, permission_ids, expected, graph_revision)
            .await
    }
}

#[tokio::test]
async fn membership_change_during_family_edit_is_a_conflict() {
    let fx = setup().await;
    let f = fx.family("F").await;
    let p = fx.permission("P").await;
    let q = fx.permission("Q").await;
    fx.grant(f.id, &[p.id]).await;

    let u = fx.user("u").await;
    fx.service
        .assign_permissions_to_user(&fx.actor, u.id, &[q.id], u.version)
        .await
        .unwrap();

    let users = InterleavingUsers {
        inner: fx.users.clone(),
        families: fx.families.clone(),
        pending: Arc::new(Mutex::new(Some(Interleaved {
            user_id: u.id,
            family_id: f.id,
        }))),
    };
    let service = AssignmentService::new(users.clone(), fx.hierarchy.clone(), fx.audit.clone());

    // The edit sees no members of F, then U joins F and drops Q.
    let token = fx.token(f.id).await;
    let err = service
        .assign_permissions_to_family(&fx.actor, f.id, &[], token)
        .await
        .unwrap_err();
    assert!(matches!(err, GestorError::ConcurrencyConflict { .. }));
    assert!(users.pending.lock().unwrap().is_none());

    let effective = fx.resolver.compute_effective(u.id).await.unwrap();
    assert_eq!(effective.len(), 1);
    assert_eq!(effective[0].permission.id, p.id);

    // Retried against fresh data, the edit is refused outright.
    let err = service
        .assign_permissions_to_family(&fx.actor, f.id, &[], token)
        .await
        .unwrap_err();
    assert_eq!(err.integrity(), Some(IntegrityViolation::NoEffectivePermissions));
}
