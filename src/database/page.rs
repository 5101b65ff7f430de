use serde::Serialize;

/// One page of results; `total` ignores limit and offset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub size: u32,
    pub pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, page: u32, size: u32) -> Self {
        let size_i64 = i64::from(size.max(1));
        let pages = (total.max(0) + size_i64 - 1) / size_i64;
        Self { items, total, page, size, pages }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            size: self.size,
            pages: self.pages,
        }
    }
}

/// `LIMIT size OFFSET (page - 1) * size`
pub fn limit_offset(page: u32, size: u32) -> (u64, u64) {
    (u64::from(size), u64::from(page.saturating_sub(1)) * u64::from(size))
}
