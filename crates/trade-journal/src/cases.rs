use crate::db::JournalDb;
use crate::error::{JournalError, Result};
use crate::models::*;
use crate::validation::*;
use chrono::NaiveDate;
use sqlx::{QueryBuilder, Sqlite};

#[derive(Debug, sqlx::FromRow)]
struct CaseRow {
    id: i64,
    title: String,
    stock_code: Option<String>,
    stock_name: Option<String>,
    case_type: CaseType,
    tags: String,
    content: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl From<CaseRow> for CaseStudy {
    fn from(row: CaseRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            stock_code: row.stock_code,
            stock_name: row.stock_name,
            case_type: row.case_type,
            tags: split_tags(&row.tags),
            content: row.content,
            start_date: row.start_date,
            end_date: row.end_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn split_tags(stored: &str) -> Vec<String> {
    stored
        .split(',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Trimmed, de-duplicated, order-preserving
fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            continue;
        }
        if tag.contains(',') {
            return Err(JournalError::validation("tags", format!("'{}' must not contain a comma", tag)));
        }
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    Ok(out)
}

/// Library of written-up trades worth remembering
pub struct CaseLibrary {
    db: JournalDb,
}

impl CaseLibrary {
    pub fn new(db: JournalDb) -> Self {
        Self { db }
    }

    fn validate(&self, mut case: CaseInput) -> Result<CaseInput> {
        require_non_blank("title", &case.title)?;
        require_non_blank("content", &case.content)?;
        case.title = case.title.trim().to_string();
        case.stock_code = match clean_optional(case.stock_code) {
            Some(code) => Some(normalize_stock_code(&code)?),
            None => None,
        };
        case.stock_name = clean_optional(case.stock_name);
        case.tags = normalize_tags(case.tags)?;
        if let (Some(start), Some(end)) = (case.start_date, case.end_date) {
            if end < start {
                return Err(JournalError::validation("end_date", "must not be before start_date"));
            }
        }
        Ok(case)
    }

    pub async fn create_case(&self, case: CaseInput) -> Result<CaseStudy> {
        let case = self.validate(case)?;

        let row = sqlx::query_as::<_, CaseRow>(
            r#"
            INSERT INTO case_studies (title, stock_code, stock_name, case_type, tags, content, start_date, end_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&case.title)
        .bind(&case.stock_code)
        .bind(&case.stock_name)
        .bind(case.case_type)
        .bind(case.tags.join(","))
        .bind(&case.content)
        .bind(case.start_date)
        .bind(case.end_date)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.into())
    }

    pub async fn get_case(&self, id: i64) -> Result<CaseStudy> {
        sqlx::query_as::<_, CaseRow>("SELECT * FROM case_studies WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(CaseStudy::from)
            .ok_or_else(|| JournalError::not_found("Case", id))
    }

    pub async fn update_case(&self, id: i64, case: CaseInput) -> Result<CaseStudy> {
        self.get_case(id).await?;
        let case = self.validate(case)?;

        let row = sqlx::query_as::<_, CaseRow>(
            r#"
            UPDATE case_studies
            SET title = ?, stock_code = ?, stock_name = ?, case_type = ?, tags = ?, content = ?,
                start_date = ?, end_date = ?, updated_at = datetime('now')
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&case.title)
        .bind(&case.stock_code)
        .bind(&case.stock_name)
        .bind(case.case_type)
        .bind(case.tags.join(","))
        .bind(&case.content)
        .bind(case.start_date)
        .bind(case.end_date)
        .bind(id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.into())
    }

    pub async fn delete_case(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM case_studies WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(JournalError::not_found("Case", id));
        }
        Ok(())
    }

    fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &CaseFilter) {
        if let Some(keyword) = filter.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            let pattern = format!("%{}%", keyword);
            qb.push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" OR content LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(tag) = filter.tag.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            qb.push(" AND (',' || tags || ',') LIKE ")
                .push_bind(format!("%,{},%", tag));
        }
        if let Some(case_type) = filter.case_type {
            qb.push(" AND case_type = ").push_bind(case_type);
        }
    }

    /// Newest first
    pub async fn list_cases(&self, filter: &CaseFilter, page: &PageRequest) -> Result<Page<CaseStudy>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM case_studies WHERE 1 = 1");
        Self::push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(self.db.pool()).await?;

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM case_studies WHERE 1 = 1");
        Self::push_filters(&mut query, filter);
        query
            .push(" ORDER BY id DESC LIMIT ")
            .push_bind(page.per_page() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = query
            .build_query_as::<CaseRow>()
            .fetch_all(self.db.pool())
            .await?;

        Ok(Page::new(rows.into_iter().map(CaseStudy::from).collect(), total, page))
    }
}
