use std::collections::HashSet;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};

use kh_core::constants::SUBGRAPH_LIMIT;
use kh_core::store::{
    CapsuleQuery, KnowledgeStore, TopicQuery, prepare_capsule, prepare_insight,
    prepare_relationship, prepare_topic,
};
use kh_core::time::now_iso8601;
use kh_core::{
    Capsule, DomainSubgraph, EntityKind, Insight, Overview, Relationship, SourceRecord,
    SourceStatus, Topic,
};

use crate::error::{Result, StoreError};
use crate::schema;

const TOPIC_COLUMNS: &str =
    "id, title, domain, keywords, source_salon_id, metadata, created_at, updated_at";
const CAPSULE_COLUMNS: &str = "id, title, domain, keywords, insight_text, source_salon_id, \
     source_topic_id, metadata, score, created_at";
const RELATIONSHIP_COLUMNS: &str = "id, source_type, source_id, target_type, target_id, \
     relationship_type, strength, created_at";
const INSIGHT_COLUMNS: &str = "id, type, source_topic_ids, common_keywords, common_domain, \
     summary, recommendations, created_at";

/// SQLite-backed knowledge store. Keyword lists, metadata and other
/// collections live in JSON text columns.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Topics ---

    fn upsert_topic(&self, topic: Topic) -> Result<Topic> {
        let tx = self.conn.unchecked_transaction()?;
        let stored = match load_topic(&tx, &topic.id)? {
            Some(mut existing) => {
                existing.metadata.extend(topic.metadata);
                existing.updated_at = now_iso8601();
                tx.execute(
                    "UPDATE topics SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                    params![
                        serde_json::to_string(&existing.metadata)?,
                        existing.updated_at,
                        existing.id
                    ],
                )?;
                tracing::debug!(topic_id = %existing.id, "topic refreshed");
                existing
            }
            None => {
                tx.execute(
                    &format!("INSERT INTO topics ({TOPIC_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                    params![
                        topic.id,
                        topic.title,
                        topic.domain,
                        serde_json::to_string(&topic.keywords)?,
                        topic.source_salon_id,
                        serde_json::to_string(&topic.metadata)?,
                        topic.created_at,
                        topic.updated_at
                    ],
                )?;
                topic
            }
        };
        tx.commit()?;
        Ok(stored)
    }

    fn select_topics(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Topic>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, TopicRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(TopicRow::decode).collect()
    }

    fn source_topic_ids(&self, salon_id: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM topics WHERE source_salon_id = ?1")?;
        let ids = stmt
            .query_map([salon_id], |row| row.get(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }

    // --- Capsules ---

    fn insert_capsule(&self, capsule: Capsule) -> Result<Capsule> {
        if let Some(existing) = self.load_capsule(&capsule.id)? {
            return Ok(existing);
        }
        self.conn.execute(
            &format!(
                "INSERT INTO capsules ({CAPSULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                capsule.id,
                capsule.title,
                capsule.domain,
                serde_json::to_string(&capsule.keywords)?,
                capsule.insight_text,
                capsule.source_salon_id,
                capsule.source_topic_id,
                serde_json::to_string(&capsule.metadata)?,
                capsule.score,
                capsule.created_at
            ],
        )?;
        Ok(capsule)
    }

    fn load_capsule(&self, id: &str) -> Result<Option<Capsule>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {CAPSULE_COLUMNS} FROM capsules WHERE id = ?1"),
                [id],
                CapsuleRow::read,
            )
            .optional()?;
        row.map(CapsuleRow::decode).transpose()
    }

    fn select_capsules(&self, query: &CapsuleQuery) -> Result<Vec<Capsule>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules
             WHERE (?1 IS NULL OR domain = ?1) AND (?2 IS NULL OR source_salon_id = ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(
                params![query.domain, query.source, query.limit as i64],
                CapsuleRow::read,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(CapsuleRow::decode).collect()
    }

    // --- Relationships ---

    fn insert_relationship(&self, rel: &Relationship) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO relationships ({RELATIONSHIP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                rel.id,
                rel.source_type.as_str(),
                rel.source_id,
                rel.target_type.as_str(),
                rel.target_id,
                rel.relationship_type,
                rel.strength,
                rel.created_at
            ],
        )?;
        Ok(())
    }

    fn select_relationships(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Relationship>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, RelationshipRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RelationshipRow::decode).collect()
    }

    // --- Insights ---

    fn insert_insight(&self, insight: &Insight) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO insights ({INSIGHT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                insight.id,
                insight.insight_type,
                serde_json::to_string(&insight.source_topic_ids)?,
                serde_json::to_string(&insight.common_keywords)?,
                insight.common_domain,
                insight.summary,
                serde_json::to_string(&insight.recommendations)?,
                insight.created_at
            ],
        )?;
        Ok(())
    }

    fn select_insights(&self, insight_type: Option<&str>, limit: usize) -> Result<Vec<Insight>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM insights
             WHERE (?1 IS NULL OR type = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![insight_type, limit as i64], InsightRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(InsightRow::decode).collect()
    }

    // --- Aggregates ---

    fn overview(&self) -> Result<Overview> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let mut stmt = self.conn.prepare(
            "SELECT CASE WHEN TRIM(COALESCE(domain, '')) = '' THEN 'unknown' ELSE domain END AS bucket,
                    COUNT(*) AS n
             FROM topics
             GROUP BY bucket
             ORDER BY n DESC, bucket ASC",
        )?;
        let domain_distribution = stmt
            .query_map([], |row| {
                let bucket: String = row.get(0)?;
                let n: i64 = row.get(1)?;
                Ok((bucket, n as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Overview {
            topic_count: count("topics")?,
            capsule_count: count("capsules")?,
            relationship_count: count("relationships")?,
            domain_distribution,
        })
    }

    fn subgraph(&self, domain: &str) -> Result<DomainSubgraph> {
        let limit = SUBGRAPH_LIMIT as i64;
        let topics = self.select_topics(
            &format!(
                "SELECT {TOPIC_COLUMNS} FROM topics WHERE domain = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ),
            params![domain, limit],
        )?;
        let capsules = self.select_capsules(&CapsuleQuery {
            domain: Some(domain.to_string()),
            source: None,
            limit: SUBGRAPH_LIMIT,
        })?;
        let relationships = self.select_relationships(
            &format!(
                "WITH sub AS (
                     SELECT id FROM topics WHERE domain = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2
                 )
                 SELECT {RELATIONSHIP_COLUMNS} FROM relationships
                 WHERE source_id IN (SELECT id FROM sub) OR target_id IN (SELECT id FROM sub)
                 ORDER BY rowid"
            ),
            params![domain, limit],
        )?;

        Ok(DomainSubgraph {
            domain: domain.to_string(),
            topics,
            capsules,
            relationships,
        })
    }

    // --- Sources ---

    fn upsert_source(&self, record: &SourceRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sources (salon_id, kind, location, status, error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.salon_id,
                record.kind,
                record.location,
                record.status.as_str(),
                record.error,
                record.updated_at
            ],
        )?;
        Ok(())
    }

    fn select_sources(&self) -> Result<Vec<SourceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT salon_id, kind, location, status, error, updated_at
             FROM sources ORDER BY salon_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(salon_id, kind, location, status, error, updated_at)| {
                Ok(SourceRecord {
                    salon_id,
                    kind,
                    location,
                    status: parse_status(&status)?,
                    error,
                    updated_at,
                })
            })
            .collect()
    }
}

fn load_topic(conn: &Connection, id: &str) -> Result<Option<Topic>> {
    let row = conn
        .query_row(
            &format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?1"),
            [id],
            TopicRow::read,
        )
        .optional()?;
    row.map(TopicRow::decode).transpose()
}

fn parse_kind(s: &str) -> Result<EntityKind> {
    s.parse()
        .map_err(|_| StoreError::InvalidData(format!("invalid entity type '{s}'")))
}

fn parse_status(s: &str) -> Result<SourceStatus> {
    s.parse()
        .map_err(|_| StoreError::InvalidData(format!("invalid source status '{s}'")))
}

struct TopicRow {
    id: String,
    title: String,
    domain: Option<String>,
    keywords: String,
    source_salon_id: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl TopicRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            domain: row.get(2)?,
            keywords: row.get(3)?,
            source_salon_id: row.get(4)?,
            metadata: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<Topic> {
        Ok(Topic {
            id: self.id,
            title: self.title,
            domain: self.domain,
            keywords: serde_json::from_str(&self.keywords)?,
            source_salon_id: self.source_salon_id,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct CapsuleRow {
    id: String,
    title: String,
    domain: Option<String>,
    keywords: String,
    insight_text: String,
    source_salon_id: Option<String>,
    source_topic_id: Option<String>,
    metadata: String,
    score: f64,
    created_at: String,
}

impl CapsuleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            domain: row.get(2)?,
            keywords: row.get(3)?,
            insight_text: row.get(4)?,
            source_salon_id: row.get(5)?,
            source_topic_id: row.get(6)?,
            metadata: row.get(7)?,
            score: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<Capsule> {
        Ok(Capsule {
            id: self.id,
            title: self.title,
            domain: self.domain,
            keywords: serde_json::from_str(&self.keywords)?,
            insight_text: self.insight_text,
            source_salon_id: self.source_salon_id,
            source_topic_id: self.source_topic_id,
            metadata: serde_json::from_str(&self.metadata)?,
            score: self.score,
            created_at: self.created_at,
        })
    }
}

struct RelationshipRow {
    id: String,
    source_type: String,
    source_id: String,
    target_type: String,
    target_id: String,
    relationship_type: String,
    strength: f64,
    created_at: String,
}

impl RelationshipRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_type: row.get(1)?,
            source_id: row.get(2)?,
            target_type: row.get(3)?,
            target_id: row.get(4)?,
            relationship_type: row.get(5)?,
            strength: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<Relationship> {
        Ok(Relationship {
            id: self.id,
            source_type: parse_kind(&self.source_type)?,
            source_id: self.source_id,
            target_type: parse_kind(&self.target_type)?,
            target_id: self.target_id,
            relationship_type: self.relationship_type,
            strength: self.strength,
            created_at: self.created_at,
        })
    }
}

struct InsightRow {
    id: String,
    insight_type: String,
    source_topic_ids: String,
    common_keywords: String,
    common_domain: Option<String>,
    summary: String,
    recommendations: String,
    created_at: String,
}

impl InsightRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            insight_type: row.get(1)?,
            source_topic_ids: row.get(2)?,
            common_keywords: row.get(3)?,
            common_domain: row.get(4)?,
            summary: row.get(5)?,
            recommendations: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<Insight> {
        Ok(Insight {
            id: self.id,
            insight_type: self.insight_type,
            source_topic_ids: serde_json::from_str(&self.source_topic_ids)?,
            common_keywords: serde_json::from_str(&self.common_keywords)?,
            common_domain: self.common_domain,
            summary: self.summary,
            recommendations: serde_json::from_str(&self.recommendations)?,
            created_at: self.created_at,
        })
    }
}

impl KnowledgeStore for Store {
    fn add_topic(&mut self, topic: Topic) -> kh_core::Result<Topic> {
        let topic = prepare_topic(topic)?;
        Ok(self.upsert_topic(topic)?)
    }

    fn get_topic(&self, id: &str) -> kh_core::Result<Option<Topic>> {
        Ok(load_topic(&self.conn, id)?)
    }

    fn query_topics(&self, query: &TopicQuery) -> kh_core::Result<Vec<Topic>> {
        Ok(self.select_topics(
            &format!(
                "SELECT {TOPIC_COLUMNS} FROM topics
                 WHERE (?1 IS NULL OR domain = ?1)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2"
            ),
            params![query.domain, query.limit as i64],
        )?)
    }

    fn topic_ids_for_source(&self, salon_id: &str) -> kh_core::Result<HashSet<String>> {
        Ok(self.source_topic_ids(salon_id)?)
    }

    fn add_capsule(&mut self, capsule: Capsule) -> kh_core::Result<Capsule> {
        let capsule = prepare_capsule(capsule)?;
        Ok(self.insert_capsule(capsule)?)
    }

    fn get_capsule(&self, id: &str) -> kh_core::Result<Option<Capsule>> {
        Ok(self.load_capsule(id)?)
    }

    fn query_capsules(&self, query: &CapsuleQuery) -> kh_core::Result<Vec<Capsule>> {
        Ok(self.select_capsules(query)?)
    }

    fn add_relationship(&mut self, relationship: Relationship) -> kh_core::Result<()> {
        let relationship = prepare_relationship(relationship)?;
        Ok(self.insert_relationship(&relationship)?)
    }

    fn get_related_topics(&self, topic_id: &str) -> kh_core::Result<Vec<Topic>> {
        Ok(self.select_topics(
            &format!(
                "SELECT {TOPIC_COLUMNS} FROM topics WHERE id IN (
                     SELECT target_id FROM relationships
                     WHERE source_type = 'topic' AND target_type = 'topic' AND source_id = ?1
                     UNION
                     SELECT source_id FROM relationships
                     WHERE source_type = 'topic' AND target_type = 'topic' AND target_id = ?1
                 )
                 ORDER BY rowid"
            ),
            [topic_id],
        )?)
    }

    fn add_insight(&mut self, insight: Insight) -> kh_core::Result<Insight> {
        let insight = prepare_insight(insight)?;
        self.insert_insight(&insight)?;
        Ok(insight)
    }

    fn query_insights(&self, insight_type: Option<&str>, limit: usize) -> kh_core::Result<Vec<Insight>> {
        Ok(self.select_insights(insight_type, limit)?)
    }

    fn get_overview(&self) -> kh_core::Result<Overview> {
        Ok(self.overview()?)
    }

    fn get_domain_subgraph(&self, domain: &str) -> kh_core::Result<DomainSubgraph> {
        Ok(self.subgraph(domain)?)
    }

    fn record_source(&mut self, record: SourceRecord) -> kh_core::Result<()> {
        Ok(self.upsert_source(&record)?)
    }

    fn list_sources(&self) -> kh_core::Result<Vec<SourceRecord>> {
        Ok(self.select_sources()?)
    }
}
