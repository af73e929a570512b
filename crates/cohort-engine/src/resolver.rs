//! [`IdentityResolver`] — resolves external identities to canonical persons.

use std::sync::Arc;

use cohort_core::{
  identity::{IdentityLink, IdentitySource},
  person::{NewPerson, Person, PersonTraits},
  store::{IdentityStore, StoreError as _},
};
use uuid::Uuid;

use crate::{Error, Result};

/// Resolves and links external identifiers, creating canonical persons on
/// first contact and merging duplicates on demand.
///
/// Cloning is cheap — the store handle is reference-counted.
#[derive(Clone)]
pub struct IdentityResolver<S> {
  store: Arc<S>,
}

impl<S: IdentityStore> IdentityResolver<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Resolve an email to its person, creating one if none exists.
  ///
  /// A hit bumps `last_seen_at`. On a create race the unique-constraint
  /// violation means a concurrent caller won; the winner's row is re-read
  /// and returned, so both callers converge on the same person.
  pub async fn resolve_or_create_by_email(&self, email: &str) -> Result<Person> {
    let email = email.trim();
    if email.is_empty() {
      return Err(Error::EmptyEmail);
    }

    if let Some(person) = self
      .store
      .find_person_by_email(email)
      .await
      .map_err(Error::store)?
      && let Some(touched) = self
        .store
        .touch_person(person.person_id)
        .await
        .map_err(Error::store)?
    {
      return Ok(touched);
    }

    match self
      .store
      .create_person(NewPerson::with_email(email))
      .await
    {
      Ok(person) => Ok(person),
      Err(e) if e.is_unique_violation() => {
        match self
          .store
          .find_person_by_email(email)
          .await
          .map_err(Error::store)?
        {
          Some(person) => Ok(person),
          None => Err(Error::store(e)),
        }
      }
      Err(e) => Err(Error::store(e)),
    }
  }

  /// Point the link for `(source, external_id)` at `person_id`, creating or
  /// repointing as needed. The person must exist.
  pub async fn link_identity(
    &self,
    person_id: Uuid,
    source: IdentitySource,
    external_id: &str,
  ) -> Result<IdentityLink> {
    self
      .store
      .get_person(person_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::PersonNotFound(person_id))?;

    self
      .store
      .upsert_link(source, external_id, person_id)
      .await
      .map_err(Error::store)
  }

  /// Pure lookup: the person an external identity currently points at.
  pub async fn find_person_by_identity(
    &self,
    source: IdentitySource,
    external_id: &str,
  ) -> Result<Option<Person>> {
    let Some(link) = self
      .store
      .find_link(source, external_id)
      .await
      .map_err(Error::store)?
    else {
      return Ok(None);
    };

    self
      .store
      .get_person(link.person_id)
      .await
      .map_err(Error::store)
  }

  /// Resolve an external identity that arrives with an optional email
  /// (e.g. a billing webhook carrying customer id + email).
  ///
  /// Precedence: an existing link always wins, and the email is ignored
  /// (it is assumed stable); else the email resolves to an existing
  /// person, which gets the link; else a new person is created from email
  /// and traits and linked. A known external id being authoritative over a
  /// possibly-reused email is what prevents identity fragmentation.
  pub async fn resolve_or_create_from_external(
    &self,
    source: IdentitySource,
    external_id: &str,
    email: Option<&str>,
    traits: PersonTraits,
  ) -> Result<Person> {
    if let Some(link) = self
      .store
      .find_link(source, external_id)
      .await
      .map_err(Error::store)?
    {
      return self
        .store
        .touch_person(link.person_id)
        .await
        .map_err(Error::store)?
        .ok_or(Error::PersonNotFound(link.person_id));
    }

    let email = email.map(str::trim).filter(|e| !e.is_empty());

    if let Some(email) = email
      && let Some(person) = self
        .store
        .find_person_by_email(email)
        .await
        .map_err(Error::store)?
    {
      self
        .store
        .upsert_link(source, external_id, person.person_id)
        .await
        .map_err(Error::store)?;
      return self
        .store
        .touch_person(person.person_id)
        .await
        .map_err(Error::store)?
        .ok_or(Error::PersonNotFound(person.person_id));
    }

    let person = match self
      .store
      .create_person(traits.into_new_person(email.map(str::to_owned)))
      .await
    {
      Ok(person) => person,
      Err(e) if e.is_unique_violation() => {
        // A concurrent caller created the person for this email first.
        let Some(email) = email else {
          return Err(Error::store(e));
        };
        self
          .store
          .find_person_by_email(email)
          .await
          .map_err(Error::store)?
          .ok_or(Error::store(e))?
      }
      Err(e) => return Err(Error::store(e)),
    };

    self
      .store
      .upsert_link(source, external_id, person.person_id)
      .await
      .map_err(Error::store)?;

    tracing::debug!(
      %source,
      external_id,
      person_id = %person.person_id,
      "linked external identity"
    );

    Ok(person)
  }

  /// Merge `source_id` into `target_id`. Everything the source owns moves
  /// to the target in one store transaction; the source is deleted.
  pub async fn merge_persons(
    &self,
    source_id: Uuid,
    target_id: Uuid,
  ) -> Result<()> {
    if source_id == target_id {
      return Err(Error::MergeSamePerson(source_id));
    }

    self
      .store
      .get_person(source_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::PersonNotFound(source_id))?;
    self
      .store
      .get_person(target_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::PersonNotFound(target_id))?;

    self
      .store
      .merge_persons(source_id, target_id)
      .await
      .map_err(Error::store)?;

    tracing::info!(%source_id, %target_id, "merged persons");
    Ok(())
  }
}
