#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDirection {
    Backward,
    Forward,
}

#[derive(Debug, Default)]
struct Cycle {
    position: Option<usize>,
    return_page: Option<usize>,
}

/// User-placed marks on pages of the open archive, kept sorted.
#[derive(Debug, Default)]
pub struct Jumpmarks {
    marks: Vec<usize>,
    cycle: Cycle,
}

impl Jumpmarks {
    pub fn has(&self, page: usize) -> bool {
        self.marks.binary_search(&page).is_ok()
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn pages(&self) -> &[usize] {
        &self.marks
    }

    /// Marks `page` if unmarked and vice versa. Returns whether the page is
    /// marked afterwards.
    pub fn toggle(&mut self, page: usize) -> bool {
        match self.marks.binary_search(&page) {
            Ok(pos) => {
                self.marks.remove(pos);
                false
            }
            Err(pos) => {
                self.marks.insert(pos, page);
                true
            }
        }
    }

    /// Next mark to jump to, wrapping around at both ends. The first step of a
    /// cycle remembers `current` so it can be returned to.
    pub fn cycle(&mut self, direction: CycleDirection, current: usize) -> Option<usize> {
        if self.marks.is_empty() {
            return None;
        }
        let len = self.marks.len();
        let next = match (self.cycle.position, direction) {
            (None, CycleDirection::Forward) => {
                self.cycle.return_page = Some(current);
                0
            }
            (None, CycleDirection::Backward) => {
                self.cycle.return_page = Some(current);
                len - 1
            }
            (Some(pos), CycleDirection::Forward) => (pos + 1) % len,
            (Some(pos), CycleDirection::Backward) => (pos + len - 1) % len,
        };
        self.cycle.position = Some(next);
        Some(self.marks[next])
    }

    pub fn return_page(&self) -> Option<usize> {
        self.cycle.return_page
    }

    pub fn end_cycle(&mut self) {
        self.cycle = Cycle::default();
    }

    pub fn clear(&mut self) {
        self.marks.clear();
        self.end_cycle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_keeps_sorted() {
        let mut marks = Jumpmarks::default();
        assert!(marks.toggle(9));
        assert!(marks.toggle(2));
        assert!(marks.toggle(5));
        assert_eq!(marks.pages(), &[2, 5, 9]);

        assert!(!marks.toggle(5));
        assert_eq!(marks.pages(), &[2, 9]);
        assert!(marks.has(9));
        assert!(!marks.has(5));
    }

    #[test]
    fn test_cycle_wraps_and_remembers_return_page() {
        let mut marks = Jumpmarks::default();
        marks.toggle(3);
        marks.toggle(10);

        assert_eq!(marks.cycle(CycleDirection::Forward, 6), Some(3));
        assert_eq!(marks.cycle(CycleDirection::Forward, 3), Some(10));
        assert_eq!(marks.cycle(CycleDirection::Forward, 10), Some(3));
        assert_eq!(marks.cycle(CycleDirection::Backward, 3), Some(10));
        assert_eq!(marks.return_page(), Some(6));

        marks.end_cycle();
        assert_eq!(marks.return_page(), None);
        assert_eq!(marks.cycle(CycleDirection::Backward, 0), Some(10));
    }

    #[test]
    fn test_cycle_without_marks() {
        let mut marks = Jumpmarks::default();
        assert_eq!(marks.cycle(CycleDirection::Forward, 0), None);
        assert_eq!(marks.return_page(), None);
    }
}
