use crate::models::{
    AnalysisFields, CollectionPair, Edge, EdgeFilter, EdgeRow, EdgeType, Repository,
    RepositoryFilter, RepositoryPatch, RepositoryRow, SimilarityCacheRow, SyncRun,
};
use anyhow::Context;
use sqlx::{FromRow, QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::warn;

const REPO_COLUMNS: &str = "full_name, owner, name, description, url, language, languages_json, \
     topics_json, stars, forks, pushed_at, archived, visibility, owner_type, starred_at, summary, \
     categories_json, features_json, use_cases_json, analyzed_at, deleted_at";

/// A keyword match with its FTS5 `bm25()` rank (more negative is better).
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub repository: Repository,
    pub rank: f64,
}

/// Typed accessors over the SQLite schema.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_repository(&self, full_name: &str) -> anyhow::Result<Option<Repository>> {
        let sql = format!("SELECT {REPO_COLUMNS} FROM repositories WHERE full_name = ?1");
        let row = sqlx::query_as::<_, RepositoryRow>(&sql)
            .bind(full_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Repository::from))
    }

    /// Batched lookup of non-deleted repositories; missing names are skipped.
    pub async fn get_repositories(&self, names: &[String]) -> anyhow::Result<Vec<Repository>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {REPO_COLUMNS} FROM repositories WHERE deleted_at IS NULL AND full_name IN ("
        ));
        let mut separated = qb.separated(", ");
        for name in names {
            separated.push_bind(name);
        }
        separated.push_unseparated(")");
        let rows = qb
            .build_query_as::<RepositoryRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Repository::from).collect())
    }

    /// All non-deleted repositories in stable identity order.
    pub async fn all_repositories(&self) -> anyhow::Result<Vec<Repository>> {
        let sql = format!(
            "SELECT {REPO_COLUMNS} FROM repositories WHERE deleted_at IS NULL ORDER BY full_name"
        );
        let rows = sqlx::query_as::<_, RepositoryRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Repository::from).collect())
    }

    pub async fn list_repositories(
        &self,
        filter: &RepositoryFilter,
    ) -> anyhow::Result<Vec<Repository>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {REPO_COLUMNS} FROM repositories WHERE deleted_at IS NULL"
        ));
        if let Some(owner) = &filter.owner {
            qb.push(" AND owner = ").push_bind(owner);
        }
        if let Some(language) = &filter.language {
            qb.push(" AND language = ").push_bind(language);
        }
        if let Some(min) = filter.min_stars {
            qb.push(" AND stars >= ").push_bind(min);
        }
        if !filter.include_archived {
            qb.push(" AND archived = 0");
        }
        qb.push(" ORDER BY stars DESC, full_name");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }
        let rows = qb
            .build_query_as::<RepositoryRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Repository::from).collect())
    }

    pub async fn top_by_stars(&self, limit: usize) -> anyhow::Result<Vec<Repository>> {
        let sql = format!(
            "SELECT {REPO_COLUMNS} FROM repositories WHERE deleted_at IS NULL \
             ORDER BY stars DESC, full_name LIMIT ?1"
        );
        let rows = sqlx::query_as::<_, RepositoryRow>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Repository::from).collect())
    }

    /// Full-text lookup over name, description, topics and summary.
    pub async fn search_by_keyword(
        &self,
        query: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<KeywordHit>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };
        let columns = REPO_COLUMNS
            .split(", ")
            .map(|c| format!("r.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns}, bm25(repo_fts) AS kw_rank FROM repo_fts \
             JOIN repositories r ON r.full_name = repo_fts.full_name \
             WHERE repo_fts MATCH ?1 AND r.deleted_at IS NULL \
             ORDER BY kw_rank LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(match_expr)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .context("keyword search")?;
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let rank: f64 = row.try_get("kw_rank")?;
            let repository = Repository::from(RepositoryRow::from_row(&row)?);
            hits.push(KeywordHit { repository, rank });
        }
        Ok(hits)
    }

    /// Insert or fully replace a repository record and refresh its keyword entry.
    pub async fn upsert_repository(&self, repo: &Repository) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO repositories (full_name, owner, name, description, url, language, languages_json,
                topics_json, stars, forks, pushed_at, archived, visibility, owner_type, starred_at, summary,
                categories_json, features_json, use_cases_json, analyzed_at, deleted_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, NULL,
                strftime('%s','now'))
            ON CONFLICT(full_name) DO UPDATE SET
                owner=excluded.owner,
                name=excluded.name,
                description=excluded.description,
                url=excluded.url,
                language=excluded.language,
                languages_json=excluded.languages_json,
                topics_json=excluded.topics_json,
                stars=excluded.stars,
                forks=excluded.forks,
                pushed_at=excluded.pushed_at,
                archived=excluded.archived,
                visibility=excluded.visibility,
                owner_type=excluded.owner_type,
                starred_at=excluded.starred_at,
                summary=excluded.summary,
                categories_json=excluded.categories_json,
                features_json=excluded.features_json,
                use_cases_json=excluded.use_cases_json,
                analyzed_at=excluded.analyzed_at,
                deleted_at=NULL,
                updated_at=strftime('%s','now')
            "#,
        )
        .bind(&repo.full_name)
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(&repo.description)
        .bind(&repo.url)
        .bind(&repo.language)
        .bind(
            repo.languages
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&repo.topics)?)
        .bind(repo.stars)
        .bind(repo.forks)
        .bind(&repo.pushed_at)
        .bind(repo.archived)
        .bind(&repo.visibility)
        .bind(&repo.owner_type)
        .bind(&repo.starred_at)
        .bind(&repo.summary)
        .bind(serde_json::to_string(&repo.categories)?)
        .bind(serde_json::to_string(&repo.features)?)
        .bind(serde_json::to_string(&repo.use_cases)?)
        .bind(repo.analyzed_at)
        .execute(&mut *tx)
        .await?;
        refresh_fts(&mut tx, &repo.full_name).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Update only the metadata columns set in `patch`; analysis columns are untouched.
    pub async fn patch_repository(
        &self,
        full_name: &str,
        patch: &RepositoryPatch,
    ) -> anyhow::Result<bool> {
        if patch.is_empty() {
            return Ok(false);
        }
        let mut tx = self.pool.begin().await?;
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE repositories SET updated_at = strftime('%s','now')");
        if let Some(stars) = patch.stars {
            qb.push(", stars = ").push_bind(stars);
        }
        if let Some(forks) = patch.forks {
            qb.push(", forks = ").push_bind(forks);
        }
        if let Some(description) = &patch.description {
            qb.push(", description = ").push_bind(description.clone());
        }
        if let Some(language) = &patch.language {
            qb.push(", language = ").push_bind(language.clone());
        }
        if let Some(archived) = patch.archived {
            qb.push(", archived = ").push_bind(archived);
        }
        if let Some(visibility) = &patch.visibility {
            qb.push(", visibility = ").push_bind(visibility.clone());
        }
        if let Some(owner_type) = &patch.owner_type {
            qb.push(", owner_type = ").push_bind(owner_type.clone());
        }
        qb.push(" WHERE full_name = ").push_bind(full_name);
        let affected = qb.build().execute(&mut *tx).await?.rows_affected();
        if patch.description.is_some() {
            refresh_fts(&mut tx, full_name).await?;
        }
        tx.commit().await?;
        Ok(affected > 0)
    }

    pub async fn update_analysis(
        &self,
        full_name: &str,
        analysis: &AnalysisFields,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE repositories
            SET summary = ?2, categories_json = ?3, features_json = ?4, use_cases_json = ?5,
                analyzed_at = ?6, updated_at = strftime('%s','now')
            WHERE full_name = ?1
            "#,
        )
        .bind(full_name)
        .bind(&analysis.summary)
        .bind(serde_json::to_string(&analysis.categories)?)
        .bind(serde_json::to_string(&analysis.features)?)
        .bind(serde_json::to_string(&analysis.use_cases)?)
        .bind(analysis.analyzed_at)
        .execute(&mut *tx)
        .await?;
        refresh_fts(&mut tx, full_name).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Physically removes the repository with its edges, memberships and keyword entry.
    pub async fn delete_repository(&self, full_name: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM repo_edges WHERE source = ?1 OR target = ?1")
            .bind(full_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collection_items WHERE repo = ?1")
            .bind(full_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM repo_fts WHERE full_name = ?1")
            .bind(full_name)
            .execute(&mut *tx)
            .await?;
        let affected = sqlx::query("DELETE FROM repositories WHERE full_name = ?1")
            .bind(full_name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(affected > 0)
    }

    /// Marks the repository inactive; edges are dropped, the row is kept.
    pub async fn soft_delete_repository(&self, full_name: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        let affected = sqlx::query(
            "UPDATE repositories SET deleted_at = strftime('%s','now') WHERE full_name = ?1 AND deleted_at IS NULL",
        )
        .bind(full_name)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query("DELETE FROM repo_edges WHERE source = ?1 OR target = ?1")
            .bind(full_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(affected > 0)
    }

    /// Outgoing edges of `source`, optionally restricted to `types`, strongest first.
    pub async fn get_edges(
        &self,
        source: &str,
        types: &[EdgeType],
        limit: usize,
    ) -> anyhow::Result<Vec<Edge>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT source, target, edge_type, weight, metadata_json FROM repo_edges WHERE source = ",
        );
        qb.push_bind(source);
        if !types.is_empty() {
            qb.push(" AND edge_type IN (");
            let mut separated = qb.separated(", ");
            for t in types {
                separated.push_bind(t.as_str());
            }
            separated.push_unseparated(")");
        }
        qb.push(" ORDER BY weight DESC, id LIMIT ").push_bind(limit as i64);
        let rows = qb.build_query_as::<EdgeRow>().fetch_all(&self.pool).await?;
        Ok(rows_to_edges(rows))
    }

    pub async fn edges_of_type(&self, edge_type: EdgeType) -> anyhow::Result<Vec<Edge>> {
        let rows = sqlx::query_as::<_, EdgeRow>(
            "SELECT source, target, edge_type, weight, metadata_json FROM repo_edges WHERE edge_type = ?1 ORDER BY id",
        )
        .bind(edge_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows_to_edges(rows))
    }

    pub async fn count_edges(&self) -> anyhow::Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT edge_type, COUNT(*) FROM repo_edges GROUP BY edge_type ORDER BY edge_type",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn batch_insert_edges(&self, edges: &[Edge]) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_edges(&mut tx, edges).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn delete_edges(&self, filter: &EdgeFilter) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let deleted = delete_edges(&mut tx, filter).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    /// Deletes the edges matched by `filter` and inserts `edges` in one transaction.
    pub async fn replace_edges(
        &self,
        filter: &EdgeFilter,
        edges: &[Edge],
    ) -> anyhow::Result<(u64, usize)> {
        let mut tx = self.pool.begin().await?;
        let deleted = delete_edges(&mut tx, filter).await?;
        let inserted = insert_edges(&mut tx, edges).await?;
        tx.commit().await?;
        Ok((deleted, inserted))
    }

    pub async fn add_to_collection(&self, collection: &str, full_name: &str) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO collections (name) VALUES (?1)")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT OR IGNORE INTO collection_items (collection_id, repo) \
             VALUES ((SELECT id FROM collections WHERE name = ?1), ?2)",
        )
        .bind(collection)
        .bind(full_name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_from_collection(
        &self,
        collection: &str,
        full_name: &str,
    ) -> anyhow::Result<bool> {
        let affected = sqlx::query(
            "DELETE FROM collection_items WHERE repo = ?2 \
             AND collection_id = (SELECT id FROM collections WHERE name = ?1)",
        )
        .bind(collection)
        .bind(full_name)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    /// Unordered pairs sharing a collection, `source < target`.
    pub async fn collection_pairs(&self) -> anyhow::Result<Vec<CollectionPair>> {
        let pairs = sqlx::query_as::<_, CollectionPair>(
            r#"
            SELECT a.repo AS source, b.repo AS target, c.name AS collection
            FROM collection_items a
            JOIN collection_items b ON a.collection_id = b.collection_id AND a.repo < b.repo
            JOIN collections c ON c.id = a.collection_id
            ORDER BY c.name, a.repo, b.repo
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(pairs)
    }

    pub async fn insert_sync_run(&self, run: &SyncRun) -> anyhow::Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO sync_runs (kind, status, started_at, completed_at, total, added, updated,
                unchanged, deleted, failed, error_text)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&run.kind)
        .bind(&run.status)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.total)
        .bind(run.added)
        .bind(run.updated)
        .bind(run.unchanged)
        .bind(run.deleted)
        .bind(run.failed)
        .bind(&run.error_text)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn recent_sync_runs(&self, limit: usize) -> anyhow::Result<Vec<SyncRun>> {
        let runs = sqlx::query_as::<_, SyncRun>(
            "SELECT id, kind, status, started_at, completed_at, total, added, updated, unchanged, \
             deleted, failed, error_text FROM sync_runs ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    pub async fn load_similarity_cache(&self) -> anyhow::Result<Option<SimilarityCacheRow>> {
        let row = sqlx::query_as::<_, SimilarityCacheRow>(
            "SELECT top_n, k, payload, built_at FROM similarity_cache WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Overwrites the single cache row as a whole.
    pub async fn store_similarity_cache(&self, row: &SimilarityCacheRow) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO similarity_cache (id, top_n, k, payload, built_at) VALUES (1, ?1, ?2, ?3, ?4)",
        )
        .bind(row.top_n)
        .bind(row.k)
        .bind(&row.payload)
        .bind(row.built_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_similarity_cache(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM similarity_cache")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn rows_to_edges(rows: Vec<EdgeRow>) -> Vec<Edge> {
    rows.into_iter()
        .filter_map(|row| match Edge::try_from(row) {
            Ok(edge) => Some(edge),
            Err(e) => {
                warn!("skipping stored edge: {e}");
                None
            }
        })
        .collect()
}

async fn insert_edges(tx: &mut Transaction<'_, Sqlite>, edges: &[Edge]) -> anyhow::Result<usize> {
    for edge in edges {
        sqlx::query(
            "INSERT INTO repo_edges (source, target, edge_type, weight, metadata_json) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&edge.source)
        .bind(&edge.target)
        .bind(edge.edge_type.as_str())
        .bind(edge.weight)
        .bind(edge.metadata.to_string())
        .execute(&mut **tx)
        .await?;
    }
    Ok(edges.len())
}

async fn delete_edges(tx: &mut Transaction<'_, Sqlite>, filter: &EdgeFilter) -> anyhow::Result<u64> {
    let result = match filter {
        EdgeFilter::OfType(edge_type) => {
            sqlx::query("DELETE FROM repo_edges WHERE edge_type = ?1")
                .bind(edge_type.as_str())
                .execute(&mut **tx)
                .await?
        }
        EdgeFilter::Touching { edge_type, node } => {
            sqlx::query("DELETE FROM repo_edges WHERE edge_type = ?1 AND (source = ?2 OR target = ?2)")
                .bind(edge_type.as_str())
                .bind(node)
                .execute(&mut **tx)
                .await?
        }
    };
    Ok(result.rows_affected())
}

async fn refresh_fts(tx: &mut Transaction<'_, Sqlite>, full_name: &str) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM repo_fts WHERE full_name = ?1")
        .bind(full_name)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO repo_fts (full_name, name, description, topics, summary)
        SELECT full_name, name, COALESCE(description, ''),
               COALESCE((SELECT group_concat(value, ' ') FROM json_each(topics_json)), ''),
               COALESCE(summary, '')
        FROM repositories WHERE full_name = ?1
        "#,
    )
    .bind(full_name)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Turns free text into an FTS5 expression of quoted tokens joined by `OR`.
pub fn fts_match_expression(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}
