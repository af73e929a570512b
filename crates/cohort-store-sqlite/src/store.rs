//! [`SqliteStore`] — the SQLite implementation of [`IdentityStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use cohort_core::{
  features::PersonFeatures,
  identity::{IdentityLink, IdentitySource},
  person::{NewPerson, Person},
  segment::{NewSegment, Segment, SegmentMember},
  store::{IdentityStore, reconcile_merged_traits},
};

use crate::{
  Error, Result,
  encode::{
    RawFeatures, RawLink, RawMember, RawPerson, RawSegment,
    encode_dt, encode_event_counts, encode_rules, encode_source, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Cohort identity store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── IdentityStore impl ──────────────────────────────────────────────────────

impl IdentityStore for SqliteStore {
  type Error = Error;

  // ── Persons ───────────────────────────────────────────────────────────────

  async fn create_person(&self, input: NewPerson) -> Result<Person> {
    let now = Utc::now();
    let person = Person {
      person_id:      Uuid::new_v4(),
      email:          input.email,
      phone:          input.phone,
      first_name:     input.first_name,
      last_name:      input.last_name,
      first_seen_at:  now,
      last_seen_at:   now,
      active_days:    0,
      core_actions:   0,
      lifetime_value: 0.0,
    };

    let id_str = encode_uuid(person.person_id);
    let at_str = encode_dt(now);
    let email = person.email.clone();
    let phone = person.phone.clone();
    let first_name = person.first_name.clone();
    let last_name = person.last_name.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO persons (
             person_id, email, phone, first_name, last_name,
             first_seen_at, last_seen_at,
             active_days, core_actions, lifetime_value
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0, 0, 0)",
          rusqlite::params![id_str, email, phone, first_name, last_name, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(person)
  }

  async fn get_person(&self, id: Uuid) -> Result<Option<Person>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawPerson> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM persons WHERE person_id = ?1",
                RawPerson::COLUMNS
              ),
              rusqlite::params![id_str],
              RawPerson::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPerson::into_person).transpose()
  }

  async fn find_person_by_email(&self, email: &str) -> Result<Option<Person>> {
    let email = email.to_owned();

    let raw: Option<RawPerson> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM persons WHERE email = ?1",
                RawPerson::COLUMNS
              ),
              rusqlite::params![email],
              RawPerson::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPerson::into_person).transpose()
  }

  async fn touch_person(&self, id: Uuid) -> Result<Option<Person>> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());

    let raw: Option<RawPerson> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "UPDATE persons SET last_seen_at = ?2
                 WHERE person_id = ?1 RETURNING {}",
                RawPerson::COLUMNS
              ),
              rusqlite::params![id_str, at_str],
              RawPerson::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPerson::into_person).transpose()
  }

  async fn list_person_ids(
    &self,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<Uuid>> {
    let limit = limit as i64;
    let offset = offset as i64;

    let ids: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT person_id FROM persons
           ORDER BY person_id LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit, offset], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    ids
      .iter()
      .map(|s| Uuid::parse_str(s).map_err(Error::Uuid))
      .collect()
  }

  async fn count_persons(&self) -> Result<usize> {
    let count: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM persons", [], |r| r.get(0))?)
      })
      .await?;
    Ok(count as usize)
  }

  // ── Identity links ────────────────────────────────────────────────────────

  async fn upsert_link(
    &self,
    source: IdentitySource,
    external_id: &str,
    person_id: Uuid,
  ) -> Result<IdentityLink> {
    let link_id_str = encode_uuid(Uuid::new_v4());
    let source_str = encode_source(source).to_owned();
    let external_id = external_id.to_owned();
    let person_id_str = encode_uuid(person_id);
    let at_str = encode_dt(Utc::now());

    // A single conditional upsert keyed on the unique pair; an existing row
    // keeps its link_id and created_at and only person_id moves.
    let raw: RawLink = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!(
            "INSERT INTO identity_links
               (link_id, source, external_id, person_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (source, external_id)
               DO UPDATE SET person_id = excluded.person_id
             RETURNING {}",
            RawLink::COLUMNS
          ),
          rusqlite::params![
            link_id_str,
            source_str,
            external_id,
            person_id_str,
            at_str
          ],
          RawLink::from_row,
        )?)
      })
      .await?;

    raw.into_link()
  }

  async fn find_link(
    &self,
    source: IdentitySource,
    external_id: &str,
  ) -> Result<Option<IdentityLink>> {
    let source_str = encode_source(source).to_owned();
    let external_id = external_id.to_owned();

    let raw: Option<RawLink> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM identity_links
                 WHERE source = ?1 AND external_id = ?2",
                RawLink::COLUMNS
              ),
              rusqlite::params![source_str, external_id],
              RawLink::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawLink::into_link).transpose()
  }

  async fn links_for_person(&self, person_id: Uuid) -> Result<Vec<IdentityLink>> {
    let person_id_str = encode_uuid(person_id);

    let raws: Vec<RawLink> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM identity_links
           WHERE person_id = ?1 ORDER BY created_at",
          RawLink::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![person_id_str], RawLink::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLink::into_link).collect()
  }

  // ── Features ──────────────────────────────────────────────────────────────

  async fn put_features(&self, features: PersonFeatures) -> Result<()> {
    let person_id_str = encode_uuid(features.person_id);
    let counts_str = encode_event_counts(&features.event_counts)?;
    let at_str = encode_dt(features.computed_at);
    let PersonFeatures {
      active_days,
      core_actions,
      days_since_signup,
      days_since_last_active,
      ..
    } = features;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO person_features (
             person_id, active_days, core_actions,
             days_since_signup, days_since_last_active,
             event_counts, computed_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
           ON CONFLICT (person_id) DO UPDATE SET
             active_days            = excluded.active_days,
             core_actions           = excluded.core_actions,
             days_since_signup      = excluded.days_since_signup,
             days_since_last_active = excluded.days_since_last_active,
             event_counts           = excluded.event_counts,
             computed_at            = excluded.computed_at",
          rusqlite::params![
            person_id_str,
            active_days,
            core_actions,
            days_since_signup,
            days_since_last_active,
            counts_str,
            at_str
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_features(&self, person_id: Uuid) -> Result<Option<PersonFeatures>> {
    let person_id_str = encode_uuid(person_id);

    let raw: Option<RawFeatures> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM person_features WHERE person_id = ?1",
                RawFeatures::COLUMNS
              ),
              rusqlite::params![person_id_str],
              RawFeatures::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawFeatures::into_features).transpose()
  }

  // ── Segments ──────────────────────────────────────────────────────────────

  async fn create_segment(&self, input: NewSegment) -> Result<Segment> {
    let segment = Segment {
      segment_id:  Uuid::new_v4(),
      name:        input.name,
      description: input.description,
      rules:       input.rules,
      enabled:     input.enabled,
      action:      input.action,
      created_at:  Utc::now(),
    };

    let id_str = encode_uuid(segment.segment_id);
    let name = segment.name.clone();
    let description = segment.description.clone();
    let rules_str = encode_rules(&segment.rules)?;
    let enabled = segment.enabled;
    let action_type = segment.action.as_ref().map(|a| a.action_type.clone());
    let action_config = segment
      .action
      .as_ref()
      .map(|a| serde_json::to_string(&a.config))
      .transpose()?;
    let at_str = encode_dt(segment.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO segments (
             segment_id, name, description, rules_json, enabled,
             action_type, action_config, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            id_str,
            name,
            description,
            rules_str,
            enabled,
            action_type,
            action_config,
            at_str
          ],
        )?;
        Ok(())
      })
      .await?;

    Ok(segment)
  }

  async fn get_segment(&self, id: Uuid) -> Result<Option<Segment>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawSegment> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM segments WHERE segment_id = ?1",
                RawSegment::COLUMNS
              ),
              rusqlite::params![id_str],
              RawSegment::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSegment::into_segment).transpose()
  }

  async fn get_segment_by_name(&self, name: &str) -> Result<Option<Segment>> {
    let name = name.to_owned();

    let raw: Option<RawSegment> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM segments WHERE name = ?1",
                RawSegment::COLUMNS
              ),
              rusqlite::params![name],
              RawSegment::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSegment::into_segment).transpose()
  }

  async fn list_segments(&self) -> Result<Vec<Segment>> {
    let raws: Vec<RawSegment> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM segments ORDER BY name",
          RawSegment::COLUMNS
        ))?;
        let rows = stmt
          .query_map([], RawSegment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSegment::into_segment).collect()
  }

  async fn update_segment(&self, segment: Segment) -> Result<()> {
    let id_str = encode_uuid(segment.segment_id);
    let name = segment.name.clone();
    let description = segment.description.clone();
    let rules_str = encode_rules(&segment.rules)?;
    let enabled = segment.enabled;
    let action_type = segment.action.as_ref().map(|a| a.action_type.clone());
    let action_config = segment
      .action
      .as_ref()
      .map(|a| serde_json::to_string(&a.config))
      .transpose()?;

    let updated: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE segments SET
             name = ?2, description = ?3, rules_json = ?4, enabled = ?5,
             action_type = ?6, action_config = ?7
           WHERE segment_id = ?1",
          rusqlite::params![
            id_str,
            name,
            description,
            rules_str,
            enabled,
            action_type,
            action_config
          ],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::SegmentNotFound(segment.segment_id));
    }
    Ok(())
  }

  async fn delete_segment(&self, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);

    // Membership rows reference the segment, so they go in the same
    // transaction.
    let deleted: usize = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "DELETE FROM segment_members WHERE segment_id = ?1",
          rusqlite::params![id_str],
        )?;
        let deleted = tx.execute(
          "DELETE FROM segments WHERE segment_id = ?1",
          rusqlite::params![id_str],
        )?;
        tx.commit()?;
        Ok(deleted)
      })
      .await?;

    if deleted == 0 {
      return Err(Error::SegmentNotFound(id));
    }
    Ok(())
  }

  // ── Segment membership ────────────────────────────────────────────────────

  async fn active_membership(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> Result<Option<SegmentMember>> {
    let person_id_str = encode_uuid(person_id);
    let segment_id_str = encode_uuid(segment_id);

    let raw: Option<RawMember> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM segment_members
                 WHERE person_id = ?1 AND segment_id = ?2
                   AND left_at IS NULL",
                RawMember::COLUMNS
              ),
              rusqlite::params![person_id_str, segment_id_str],
              RawMember::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawMember::into_member).transpose()
  }

  async fn open_membership(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> Result<SegmentMember> {
    let member = SegmentMember {
      member_id: Uuid::new_v4(),
      person_id,
      segment_id,
      joined_at: Utc::now(),
      left_at: None,
    };

    let member_id_str = encode_uuid(member.member_id);
    let person_id_str = encode_uuid(person_id);
    let segment_id_str = encode_uuid(segment_id);
    let at_str = encode_dt(member.joined_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO segment_members
             (member_id, person_id, segment_id, joined_at, left_at)
           VALUES (?1, ?2, ?3, ?4, NULL)",
          rusqlite::params![member_id_str, person_id_str, segment_id_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(member)
  }

  async fn close_membership(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> Result<()> {
    let person_id_str = encode_uuid(person_id);
    let segment_id_str = encode_uuid(segment_id);
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE segment_members SET left_at = ?3
           WHERE person_id = ?1 AND segment_id = ?2 AND left_at IS NULL",
          rusqlite::params![person_id_str, segment_id_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn active_members(&self, segment_id: Uuid) -> Result<Vec<SegmentMember>> {
    let segment_id_str = encode_uuid(segment_id);

    let raws: Vec<RawMember> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM segment_members
           WHERE segment_id = ?1 AND left_at IS NULL
           ORDER BY joined_at",
          RawMember::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![segment_id_str], RawMember::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMember::into_member).collect()
  }

  async fn membership_history(
    &self,
    person_id: Uuid,
    segment_id: Uuid,
  ) -> Result<Vec<SegmentMember>> {
    let person_id_str = encode_uuid(person_id);
    let segment_id_str = encode_uuid(segment_id);

    let raws: Vec<RawMember> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM segment_members
           WHERE person_id = ?1 AND segment_id = ?2
           ORDER BY joined_at",
          RawMember::COLUMNS
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![person_id_str, segment_id_str],
            RawMember::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMember::into_member).collect()
  }

  // ── Merge ─────────────────────────────────────────────────────────────────

  async fn merge_persons(&self, source_id: Uuid, target_id: Uuid) -> Result<()> {
    if source_id == target_id {
      return Err(Error::Core(cohort_core::Error::MergeSamePerson(source_id)));
    }

    let source = self
      .get_person(source_id)
      .await?
      .ok_or(Error::PersonNotFound(source_id))?;
    let target = self
      .get_person(target_id)
      .await?
      .ok_or(Error::PersonNotFound(target_id))?;
    let merged = reconcile_merged_traits(&source, &target);

    let source_str = encode_uuid(source_id);
    let target_str = encode_uuid(target_id);
    let now_str = encode_dt(Utc::now());
    let first_seen_str = encode_dt(merged.first_seen_at);
    let last_seen_str = encode_dt(merged.last_seen_at);

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // A source membership that would collide with an active target
        // membership in the same segment closes at merge time; everything
        // else repoints wholesale, history included.
        tx.execute(
          "UPDATE segment_members SET left_at = ?1
           WHERE person_id = ?2 AND left_at IS NULL
             AND segment_id IN (
               SELECT segment_id FROM segment_members
               WHERE person_id = ?3 AND left_at IS NULL
             )",
          rusqlite::params![now_str, source_str, target_str],
        )?;
        tx.execute(
          "UPDATE segment_members SET person_id = ?1 WHERE person_id = ?2",
          rusqlite::params![target_str, source_str],
        )?;

        // (source, external_id) uniqueness is per-pair, so bulk repointing
        // cannot collide.
        tx.execute(
          "UPDATE identity_links SET person_id = ?1 WHERE person_id = ?2",
          rusqlite::params![target_str, source_str],
        )?;

        // First-writer-wins: the source snapshot moves only when the target
        // has none; otherwise it is discarded and recomputation corrects
        // the survivor later.
        tx.execute(
          "UPDATE person_features SET person_id = ?1
           WHERE person_id = ?2
             AND NOT EXISTS (
               SELECT 1 FROM person_features WHERE person_id = ?1
             )",
          rusqlite::params![target_str, source_str],
        )?;
        tx.execute(
          "DELETE FROM person_features WHERE person_id = ?1",
          rusqlite::params![source_str],
        )?;

        // Delete the source before writing reconciled traits so inheriting
        // its email cannot trip the unique index.
        let deleted = tx.execute(
          "DELETE FROM persons WHERE person_id = ?1",
          rusqlite::params![source_str],
        )?;
        if deleted == 0 {
          return Err(rusqlite::Error::QueryReturnedNoRows.into());
        }

        let updated = tx.execute(
          "UPDATE persons SET
             email = ?2, phone = ?3, first_name = ?4, last_name = ?5,
             first_seen_at = ?6, last_seen_at = ?7,
             active_days = ?8, core_actions = ?9, lifetime_value = ?10
           WHERE person_id = ?1",
          rusqlite::params![
            target_str,
            merged.email,
            merged.phone,
            merged.first_name,
            merged.last_name,
            first_seen_str,
            last_seen_str,
            merged.active_days,
            merged.core_actions,
            merged.lifetime_value
          ],
        )?;
        if updated == 0 {
          return Err(rusqlite::Error::QueryReturnedNoRows.into());
        }

        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(())
  }
}
