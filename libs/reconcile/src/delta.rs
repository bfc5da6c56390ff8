//! Membership delta: reconciling a keyed relation between desired and
//! observed state.
//!
//! The flow within one pass is strictly ordered:
//!
//! 1. [`delta`] computes Add/Update/Remove changes from two keyed maps.
//! 2. [`materialize`] lists the whole directory, then attaches an identity to
//!    every change, provisioning missing principals when allowed.
//! 3. [`apply_changes`] writes the changes in order, swallowing conflicts.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResultExt, ReconcileError, ReconcileResult};
use crate::paginate::collect_pages;

/// One entry of a keyed relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member<A, I> {
    /// Normalized key.
    pub key: String,
    pub attribute: A,
    /// External identity, resolved lazily.
    pub identity: Option<I>,
}

impl<A, I> Member<A, I> {
    pub fn new(key: impl Into<String>, attribute: A) -> Self {
        Self {
            key: key.into(),
            attribute,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: I) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// A single change to a keyed relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<A, I> {
    Add(Member<A, I>),
    Update(Member<A, I>),
    Remove(Member<A, I>),
}

impl<A, I> Change<A, I> {
    pub fn member(&self) -> &Member<A, I> {
        match self {
            Self::Add(m) | Self::Update(m) | Self::Remove(m) => m,
        }
    }

    fn member_mut(&mut self) -> &mut Member<A, I> {
        match self {
            Self::Add(m) | Self::Update(m) | Self::Remove(m) => m,
        }
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, Self::Remove(_))
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Update(_) => "update",
            Self::Remove(_) => "remove",
        }
    }
}

/// A keyed relation indexed by normalized key.
pub type Relation<A, I> = BTreeMap<String, Member<A, I>>;

/// Case-folds and trims an email or login.
pub fn normalize_email(key: &str) -> String {
    key.trim().to_lowercase()
}

/// Indexes entries by `normalize(key)`. Later duplicates win.
pub fn index_by<A, I, F>(
    entries: impl IntoIterator<Item = Member<A, I>>,
    normalize: F,
) -> Relation<A, I>
where
    F: Fn(&str) -> String,
{
    entries
        .into_iter()
        .map(|mut member| {
            member.key = normalize(&member.key);
            (member.key.clone(), member)
        })
        .collect()
}

/// Computes the changes that turn `stateful` into `desired`.
///
/// Adds and updates come first in key order, then removes in key order.
pub fn delta<A, I>(stateful: &Relation<A, I>, desired: &Relation<A, I>) -> Vec<Change<A, I>>
where
    A: PartialEq + Clone,
    I: Clone,
{
    let mut changes = Vec::new();

    for (key, wanted) in desired {
        match stateful.get(key) {
            None => changes.push(Change::Add(wanted.clone())),
            Some(current) if current.attribute != wanted.attribute => {
                let mut member = wanted.clone();
                if member.identity.is_none() {
                    member.identity = current.identity.clone();
                }
                changes.push(Change::Update(member));
            }
            Some(_) => {}
        }
    }

    for (key, current) in stateful {
        if !desired.contains_key(key) {
            changes.push(Change::Remove(current.clone()));
        }
    }

    changes
}

/// A principal listed by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal<I> {
    pub key: String,
    pub identity: I,
}

/// The external directory that owns principal identities.
#[async_trait]
pub trait Directory: Send + Sync {
    type Identity: Clone + fmt::Display + Send + Sync;

    /// Page size to request when listing.
    fn page_size(&self) -> u32 {
        crate::paginate::DEFAULT_PAGE_SIZE
    }

    /// Returns one page of principals. Pages start at 1.
    async fn list_page(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Principal<Self::Identity>>, GatewayError>;

    /// Creates a principal for `key` and returns its identity.
    async fn provision(&self, key: &str) -> Result<Self::Identity, GatewayError>;
}

/// Writes individual relation changes.
#[async_trait]
pub trait RelationWriter<A, I>: Send + Sync
where
    A: Send + Sync,
    I: Send + Sync,
{
    async fn add(&self, identity: &I, key: &str, attribute: &A) -> Result<(), GatewayError>;
    async fn update(&self, identity: &I, attribute: &A) -> Result<(), GatewayError>;
    async fn remove(&self, identity: &I) -> Result<(), GatewayError>;
}

/// Lists the whole directory into a key to identity index.
pub async fn directory_index<D, F>(
    directory: &D,
    normalize: F,
) -> ReconcileResult<HashMap<String, D::Identity>>
where
    D: Directory + ?Sized,
    F: Fn(&str) -> String,
{
    let principals = collect_pages(directory.page_size(), |page, per_page| {
        directory.list_page(page, per_page)
    })
    .await
    .during("list directory")?;

    Ok(principals
        .into_iter()
        .map(|p| (normalize(&p.key), p.identity))
        .collect())
}

/// Attaches a directory identity to every change.
///
/// Removes of principals that vanished from the directory are dropped.
/// Other changes for unknown principals are provisioned when
/// `auto_provision` is set and otherwise fail the pass.
pub async fn materialize<A, D, F>(
    directory: &D,
    changes: Vec<Change<A, D::Identity>>,
    auto_provision: bool,
    normalize: F,
) -> ReconcileResult<Vec<Change<A, D::Identity>>>
where
    D: Directory + ?Sized,
    F: Fn(&str) -> String,
{
    if changes.is_empty() {
        return Ok(changes);
    }

    let mut index = directory_index(directory, &normalize).await?;
    let mut resolved = Vec::with_capacity(changes.len());

    for mut change in changes {
        let key = normalize(&change.member().key);

        if let Some(identity) = index.get(&key) {
            change.member_mut().identity = Some(identity.clone());
            resolved.push(change);
            continue;
        }

        if change.is_remove() {
            warn!(key = %key, "principal no longer in directory, skipping removal");
            continue;
        }

        if !auto_provision {
            return Err(ReconcileError::MissingPrincipal { key });
        }

        let identity = directory
            .provision(&key)
            .await
            .during(format!("provision principal '{key}'"))?;
        info!(key = %key, identity = %identity, "provisioned principal");

        index.insert(key, identity.clone());
        change.member_mut().identity = Some(identity);
        resolved.push(change);
    }

    Ok(resolved)
}

/// Applies changes in order.
///
/// A conflict on one change counts as success for that change. Any other
/// failure stops the remaining changes; earlier ones stay applied.
pub async fn apply_changes<A, I, W>(writer: &W, changes: &[Change<A, I>]) -> ReconcileResult<()>
where
    A: fmt::Debug + Send + Sync,
    I: fmt::Display + Send + Sync,
    W: RelationWriter<A, I> + ?Sized,
{
    for change in changes {
        let member = change.member();
        let Some(identity) = member.identity.as_ref() else {
            return Err(ReconcileError::InvariantViolation(format!(
                "membership change for '{}' has no identity",
                member.key
            )));
        };

        let result = match change {
            Change::Add(m) => writer.add(identity, &m.key, &m.attribute).await,
            Change::Update(m) => writer.update(identity, &m.attribute).await,
            Change::Remove(_) => writer.remove(identity).await,
        };

        match result {
            Ok(()) => {
                debug!(
                    action = change.action(),
                    key = %member.key,
                    attribute = ?member.attribute,
                    "applied membership change"
                );
            }
            Err(e) if e.is_conflict() => {
                warn!(
                    action = change.action(),
                    key = %member.key,
                    error = %e,
                    "membership change conflicted, treating as applied"
                );
            }
            Err(e) => {
                return Err(e).during(format!("{} member '{}'", change.action(), member.key));
            }
        }
    }

    Ok(())
}
