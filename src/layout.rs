use std::collections::HashSet;
use std::ops::Range;
use uuid::Uuid;

use crate::models::{JobColumn, JobsPagePreferences};
use crate::prefs::PreferencesPatch;

/// User-arranged column order and visibility for the jobs table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnLayout {
    order: Vec<Uuid>,
    hidden: HashSet<Uuid>,
}

impl ColumnLayout {
    pub fn from_prefs(prefs: &JobsPagePreferences) -> Self {
        Self {
            order: prefs.column_order.clone(),
            hidden: prefs.hidden_columns.iter().copied().collect(),
        }
    }

    /// All known columns in display order: arranged ones first, then the
    /// rest by server position. Ids of deleted columns are ignored.
    pub fn ordered<'a>(&self, columns: &'a [JobColumn]) -> Vec<&'a JobColumn> {
        let mut out: Vec<&JobColumn> = self
            .order
            .iter()
            .filter_map(|id| columns.iter().find(|c| c.id == *id))
            .collect();
        let mut rest: Vec<&JobColumn> = columns
            .iter()
            .filter(|c| !self.order.contains(&c.id))
            .collect();
        rest.sort_by_key(|c| c.position);
        out.extend(rest);
        out
    }

    pub fn visible<'a>(&self, columns: &'a [JobColumn]) -> Vec<&'a JobColumn> {
        self.ordered(columns)
            .into_iter()
            .filter(|c| !self.hidden.contains(&c.id))
            .collect()
    }

    pub fn is_hidden(&self, id: Uuid) -> bool {
        self.hidden.contains(&id)
    }

    pub fn toggle_hidden(&mut self, id: Uuid) {
        if !self.hidden.remove(&id) {
            self.hidden.insert(id);
        }
    }

    /// Drops `id` at `to` within the full ordered list (drag and drop).
    pub fn move_column(&mut self, columns: &[JobColumn], id: Uuid, to: usize) {
        let mut order: Vec<Uuid> = self.ordered(columns).iter().map(|c| c.id).collect();
        let Some(from) = order.iter().position(|c| *c == id) else {
            return;
        };
        let moved = order.remove(from);
        order.insert(to.min(order.len()), moved);
        self.order = order;
    }

    /// Moves a column one step left (`-1`) or right (`1`).
    pub fn shift(&mut self, columns: &[JobColumn], id: Uuid, delta: isize) {
        let ordered = self.ordered(columns);
        let Some(from) = ordered.iter().position(|c| c.id == id) else {
            return;
        };
        let to = from.saturating_add_signed(delta).min(ordered.len().saturating_sub(1));
        self.move_column(columns, id, to);
    }

    pub fn to_patch(&self) -> PreferencesPatch {
        let mut hidden: Vec<Uuid> = self.hidden.iter().copied().collect();
        hidden.sort();
        PreferencesPatch::columns(self.order.clone(), hidden)
    }
}

/// Scroll state for rendering only the rows that fit on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtualWindow {
    pub offset: usize,
}

/// Rows from the end at which the next page is requested.
pub const LOAD_MORE_THRESHOLD: usize = 10;

impl VirtualWindow {
    /// Scrolls the minimum amount needed to keep `selected` visible.
    pub fn follow(&mut self, selected: usize, height: usize) {
        if height == 0 {
            return;
        }
        if selected < self.offset {
            self.offset = selected;
        } else if selected >= self.offset + height {
            self.offset = selected + 1 - height;
        }
    }

    pub fn range(&self, total: usize, height: usize) -> Range<usize> {
        let start = self.offset.min(total);
        start..(start + height).min(total)
    }

    pub fn wants_more(&self, total: usize, height: usize, has_more: bool) -> bool {
        has_more && self.range(total, height).end + LOAD_MORE_THRESHOLD >= total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::tests::column;
    use crate::models::ColumnType;

    fn columns() -> Vec<JobColumn> {
        ["Company", "Title", "Stage", "Salary"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let mut c = column(name, ColumnType::Text, None);
                c.position = i as i32;
                c
            })
            .collect()
    }

    fn names(cols: &[&JobColumn]) -> Vec<String> {
        cols.iter().map(|c| c.name.clone()).collect()
    }

    #[test]
    fn test_drag_reorders_columns() {
        let cols = columns();
        let mut layout = ColumnLayout::default();
        layout.move_column(&cols, cols[3].id, 0);
        assert_eq!(names(&layout.ordered(&cols)), ["Salary", "Company", "Title", "Stage"]);

        layout.shift(&cols, cols[0].id, 1);
        assert_eq!(names(&layout.ordered(&cols)), ["Salary", "Title", "Company", "Stage"]);

        layout.shift(&cols, cols[3].id, -1);
        assert_eq!(names(&layout.ordered(&cols)), ["Salary", "Title", "Company", "Stage"]);
    }

    #[test]
    fn test_hidden_columns_and_new_columns() {
        let mut cols = columns();
        let mut layout = ColumnLayout::default();
        layout.move_column(&cols, cols[2].id, 0);
        layout.toggle_hidden(cols[1].id);
        assert_eq!(names(&layout.visible(&cols)), ["Stage", "Company", "Salary"]);

        let mut extra = column("Referral", ColumnType::Checkbox, None);
        extra.position = 9;
        cols.push(extra);
        cols.remove(0);
        assert_eq!(names(&layout.visible(&cols)), ["Stage", "Salary", "Referral"]);

        let patch = layout.to_patch();
        assert_eq!(patch.hidden_columns, Some(vec![cols[0].id]));
    }

    #[test]
    fn test_virtual_window_follows_selection() {
        let mut window = VirtualWindow::default();
        window.follow(25, 10);
        assert_eq!(window.range(100, 10), 16..26);
        window.follow(3, 10);
        assert_eq!(window.range(100, 10), 3..13);
        assert_eq!(window.range(8, 10), 3..8);
        assert!(window.wants_more(20, 10, true));
        assert!(!window.wants_more(20, 10, false));
        assert!(!window.wants_more(100, 10, true));
    }
}
