//! Pagination helpers for list endpoints

use sea_orm::{ConnectionTrait, EntityTrait, FromQueryResult, PaginatorTrait, Select};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;
/// Buttons shown in the page navigation strip
const MAX_VISIBLE_PAGES: u64 = 5;
/// Marker for a collapsed run of pages
pub const ELLIPSIS: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Raw query parameters; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

/// Normalized pagination parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageParams {
    pub page: u64,
    pub page_size: u64,
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort_by: None,
            sort_order: SortOrder::Asc,
        }
    }
}

impl From<PageQuery> for PageParams {
    fn from(q: PageQuery) -> Self {
        Self::from_query(q, DEFAULT_PAGE_SIZE)
    }
}

impl PageParams {
    /// Clamp page to >= 1 and page size to [1, 100]; zero or missing means default
    pub fn from_query(q: PageQuery, default_size: u64) -> Self {
        let page = match q.page {
            Some(p) if p > 0 => p as u64,
            _ => 1,
        };
        let page_size = match q.page_size {
            Some(s) if s > 0 => (s as u64).min(MAX_PAGE_SIZE),
            Some(s) if s < 0 => 1,
            _ => default_size.clamp(1, MAX_PAGE_SIZE),
        };
        Self {
            page,
            page_size,
            sort_by: q.sort_by.filter(|s| !s.is_empty()),
            sort_order: q.sort_order.unwrap_or_default(),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page - 1) * self.page_size
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, page: u64, page_size: u64) -> Self {
        Self {
            data,
            total,
            page,
            page_size,
            total_pages: total_pages(total, page_size),
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Paginated<U> {
        Paginated {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}

/// ceil(total / page_size)
pub fn total_pages(total: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

/// Page through an in-memory list. Out-of-range pages clamp to the last page.
pub fn paginate_slice<T: Clone>(items: &[T], params: &PageParams) -> Paginated<T> {
    let total = items.len() as u64;
    let last_page = total_pages(total, params.page_size).max(1);
    let page = params.page.clamp(1, last_page);
    let start = ((page - 1) * params.page_size) as usize;
    let end = (start + params.page_size as usize).min(items.len());
    let data = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
    Paginated::new(data, total, page, params.page_size)
}

/// Page numbers for the navigation strip, with ELLIPSIS for gaps
pub fn page_numbers(current: u64, total: u64) -> Vec<i64> {
    if total <= MAX_VISIBLE_PAGES {
        return (1..=total as i64).collect();
    }
    let current = current.clamp(1, total);
    let mut start = current.saturating_sub(MAX_VISIBLE_PAGES / 2).max(1);
    let mut end = start + MAX_VISIBLE_PAGES - 1;
    if end > total {
        end = total;
        start = end.saturating_sub(MAX_VISIBLE_PAGES - 1).max(1);
    }

    let mut pages = Vec::new();
    if start > 1 {
        pages.push(1);
        if start > 2 {
            pages.push(ELLIPSIS);
        }
    }
    pages.extend(start as i64..=end as i64);
    if end < total {
        if end < total - 1 {
            pages.push(ELLIPSIS);
        }
        pages.push(total as i64);
    }
    pages
}

/// Run a select with LIMIT/OFFSET and a COUNT for the total
pub async fn paginate_query<E, C>(
    db: &C,
    select: Select<E>,
    params: &PageParams,
) -> AppResult<Paginated<E::Model>>
where
    E: EntityTrait,
    E::Model: FromQueryResult + Sized + Send + Sync,
    C: ConnectionTrait,
{
    let paginator = select.paginate(db, params.page_size);
    let total = paginator.num_items().await?;
    let data = paginator.fetch_page(params.page - 1).await?;
    Ok(Paginated::new(data, total, params.page, params.page_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(page: u64, page_size: u64) -> PageParams {
        PageParams {
            page,
            page_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_query_clamping() {
        let p = PageParams::from(PageQuery {
            page: Some(0),
            page_size: Some(500),
            sort_by: Some(String::new()),
            sort_order: None,
        });
        assert_eq!(p.page, 1);
        assert_eq!(p.page_size, 100);
        assert_eq!(p.sort_by, None);
        assert_eq!(p.sort_order, SortOrder::Asc);

        let p = PageParams::from(PageQuery::default());
        assert_eq!(p.page_size, DEFAULT_PAGE_SIZE);

        let p = PageParams::from(PageQuery {
            page_size: Some(-4),
            ..Default::default()
        });
        assert_eq!(p.page_size, 1);
    }

    #[test]
    fn test_every_item_on_exactly_one_page() {
        for n in 0..40usize {
            for size in 1..12u64 {
                let items: Vec<usize> = (0..n).collect();
                let pages = total_pages(n as u64, size);
                assert_eq!(pages, (n as u64 + size - 1) / size);

                let mut seen = Vec::new();
                for page in 1..=pages {
                    seen.extend(paginate_slice(&items, &params(page, size)).data);
                }
                assert_eq!(seen, items);
            }
        }
    }

    #[test]
    fn test_out_of_range_page_clamps() {
        let items: Vec<u32> = (1..=25).collect();
        let page = paginate_slice(&items, &params(9, 10));
        assert_eq!(page.page, 3);
        assert_eq!(page.data, vec![21, 22, 23, 24, 25]);
        assert_eq!(page.total_pages, 3);

        let empty: Vec<u32> = Vec::new();
        let page = paginate_slice(&empty, &params(4, 10));
        assert_eq!(page.page, 1);
        assert!(page.data.is_empty());
    }

    #[test]
    fn test_page_numbers() {
        assert_eq!(page_numbers(1, 3), vec![1, 2, 3]);
        assert_eq!(page_numbers(1, 10), vec![1, 2, 3, 4, 5, ELLIPSIS, 10]);
        assert_eq!(page_numbers(5, 10), vec![1, ELLIPSIS, 3, 4, 5, 6, 7, ELLIPSIS, 10]);
        assert_eq!(page_numbers(10, 10), vec![1, ELLIPSIS, 6, 7, 8, 9, 10]);
        assert_eq!(page_numbers(4, 6), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_offset() {
        assert_eq!(params(3, 20).offset(), 40);
    }
}
