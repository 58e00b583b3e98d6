//! Published case study library.

use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

use super::{CASE_COLUMNS, CaseStudy, CaseType};
use crate::error::Result;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LibraryQuery {
    /// Substring matched against title, customer, industry and component.
    pub q: Option<String>,
    pub industry: Option<String>,
    pub case_type: Option<CaseType>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryPage {
    pub items: Vec<CaseStudy>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

/// Escape LIKE wildcards so user input matches literally.
fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

impl LibraryQuery {
    pub(super) fn run(&self, conn: &Connection) -> Result<LibraryPage> {
        let mut filter = String::from("status = 'published'");
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            args.push(SqlValue::Text(like_pattern(q)));
            let n = args.len();
            filter.push_str(&format!(
                " AND (title LIKE ?{n} ESCAPE '\\' OR customer_name LIKE ?{n} ESCAPE '\\' \
                 OR industry LIKE ?{n} ESCAPE '\\' OR component LIKE ?{n} ESCAPE '\\')"
            ));
        }
        if let Some(industry) = self.industry.as_deref().filter(|s| !s.is_empty()) {
            args.push(SqlValue::Text(industry.to_string()));
            filter.push_str(&format!(" AND industry = ?{} COLLATE NOCASE", args.len()));
        }
        if let Some(kind) = self.case_type {
            args.push(SqlValue::Text(kind.as_str().to_string()));
            filter.push_str(&format!(" AND case_type = ?{}", args.len()));
        }

        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let page = self.page.unwrap_or(1).max(1);

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM case_studies WHERE {}", filter),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM case_studies WHERE {} ORDER BY published_at DESC LIMIT {} OFFSET {}",
            CASE_COLUMNS,
            filter,
            per_page,
            (page - 1) * per_page
        ))?;
        let items = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), CaseStudy::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(LibraryPage {
            items,
            total: total as usize,
            page,
            per_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{complete_case, fixture};
    use super::super::{CaseStore, NewCase};
    use super::*;
    use crate::users::tests::make;
    use crate::users::{Principal, Role};

    fn publish(cases: &CaseStore, author: &Principal, reviewer: &Principal, input: NewCase) {
        let case = cases.create(author, input).unwrap();
        cases.submit(author, &case.id).unwrap();
        cases.approve(reviewer, &case.id).unwrap();
        cases.publish(reviewer, &case.id).unwrap();
    }

    #[test]
    fn only_published_cases_are_listed() {
        let f = fixture();
        let c = make(&f.users, "c@example.com", Role::Contributor);
        let a = make(&f.users, "a@example.com", Role::Approver);

        publish(&f.cases, &c, &a, complete_case(CaseType::Application));
        f.cases
            .create(&c, complete_case(CaseType::Application))
            .unwrap();

        let page = f.cases.library(&LibraryQuery::default()).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn search_and_filters() {
        let f = fixture();
        let c = make(&f.users, "c@example.com", Role::Contributor);
        let a = make(&f.users, "a@example.com", Role::Approver);

        publish(&f.cases, &c, &a, complete_case(CaseType::Application));
        publish(
            &f.cases,
            &c,
            &a,
            NewCase {
                title: "Pump impeller rebuild".into(),
                industry: "Pulp & Paper".into(),
                component: "Impeller".into(),
                ..complete_case(CaseType::Application)
            },
        );

        let by_text = |q: &str| {
            f.cases
                .library(&LibraryQuery {
                    q: Some(q.into()),
                    ..Default::default()
                })
                .unwrap()
                .total
        };
        assert_eq!(by_text("impeller"), 1);
        assert_eq!(by_text("NORTHERN"), 2);
        assert_eq!(by_text("100%"), 0);

        let mining = f
            .cases
            .library(&LibraryQuery {
                industry: Some("mining".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(mining.total, 1);

        let tech = f
            .cases
            .library(&LibraryQuery {
                case_type: Some(CaseType::Tech),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tech.total, 0);
    }

    #[test]
    fn pagination() {
        let f = fixture();
        let c = make(&f.users, "c@example.com", Role::Contributor);
        let a = make(&f.users, "a@example.com", Role::Approver);
        for _ in 0..3 {
            publish(&f.cases, &c, &a, complete_case(CaseType::Application));
        }

        let page = f
            .cases
            .library(&LibraryQuery {
                page: Some(2),
                per_page: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(like_pattern("50%_a"), "%50\\%\\_a%");
    }
}
