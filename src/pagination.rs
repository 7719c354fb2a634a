use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

fn default_num_items() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Cursor pagination input: `{num_items, cursor}` in, [`Paginated`] out.
/// Cursors are opaque strings; underneath they carry the insertion sequence
/// number of the last item already returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationOpts {
    #[serde(default = "default_num_items")]
    pub num_items: u32,
    #[serde(default)]
    pub cursor: Option<String>,
}

impl Default for PaginationOpts {
    fn default() -> Self {
        Self {
            num_items: DEFAULT_PAGE_SIZE,
            cursor: None,
        }
    }
}

impl PaginationOpts {
    pub fn first(num_items: u32) -> Self {
        Self {
            num_items,
            cursor: None,
        }
    }

    pub(crate) fn cursor_seq(&self) -> Option<i64> {
        self.cursor.as_deref().and_then(|c| c.parse().ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub page: Vec<T>,
    pub is_done: bool,
    pub continue_cursor: Option<String>,
}

impl<T> Paginated<T> {
    pub fn empty() -> Self {
        Self {
            page: Vec::new(),
            is_done: true,
            continue_cursor: None,
        }
    }
}

/// Turn an over-fetched (`num_items + 1`) descending-seq row set into a page.
/// `seq_of` extracts the sort key used as the continuation cursor.
pub(crate) fn paginate_rows<T>(
    mut rows: Vec<T>,
    num_items: u32,
    seq_of: impl Fn(&T) -> i64,
) -> Paginated<T> {
    let is_done = rows.len() <= num_items as usize;
    rows.truncate(num_items as usize);
    let continue_cursor = rows.last().map(|row| seq_of(row).to_string());
    Paginated {
        page: rows,
        is_done,
        continue_cursor,
    }
}
