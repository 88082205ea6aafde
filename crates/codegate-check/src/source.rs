//! The combined interface + user code unit and its position mapping.

/// Line that separates the interface preamble from user code.
pub(crate) const USER_CODE_MARKER: &str = "// @codegate-user-code";

// User code is checked as the body of an async function, exactly as it runs.
const HEADER: &str = "(async () => {\n";
const FOOTER: &str = "\n})();\n";

/// Where an offset in the combined unit falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Location {
    /// Inside the interface preamble.
    Interface,
    /// Inside user code, 1-indexed.
    User { line: u32, column: u32 },
}

pub(crate) struct Unit {
    pub text: String,
    /// Start of the wrapper header (first byte after the marker line).
    pub region_start: u32,
    pub user_start: u32,
    pub user_end: u32,
    user_first_line: usize,
    line_starts: Vec<u32>,
}

impl Unit {
    pub fn new(interface: &str, code: &str) -> Self {
        let mut text = String::with_capacity(interface.len() + code.len() + 64);
        text.push_str(interface);
        if !interface.is_empty() && !interface.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(USER_CODE_MARKER);
        text.push('\n');
        let region_start = text.len() as u32;
        text.push_str(HEADER);
        let user_start = text.len() as u32;
        text.push_str(code);
        let user_end = text.len() as u32;
        text.push_str(FOOTER);

        let line_starts: Vec<u32> = std::iter::once(0)
            .chain(
                text.bytes()
                    .enumerate()
                    .filter(|(_, b)| *b == b'\n')
                    .map(|(i, _)| i as u32 + 1),
            )
            .collect();
        let user_first_line = line_index(&line_starts, user_start);

        Self {
            text,
            region_start,
            user_start,
            user_end,
            user_first_line,
            line_starts,
        }
    }

    /// Whether `offset` lies in the wrapped user region (header included).
    pub fn in_user_region(&self, offset: u32) -> bool {
        offset >= self.region_start
    }

    /// Map a byte offset in the unit to a user-code position.
    ///
    /// Offsets in the wrapper header clamp to 1:1 and offsets in the footer
    /// clamp to the end of the last user line.
    pub fn locate(&self, offset: u32) -> Location {
        if offset < self.region_start {
            return Location::Interface;
        }
        if offset < self.user_start {
            return Location::User { line: 1, column: 1 };
        }
        let offset = offset.min(self.user_end);
        let idx = line_index(&self.line_starts, offset);
        let start = self.line_starts[idx] as usize;
        let column = self
            .text
            .get(start..offset as usize)
            .map_or(0, |s| s.chars().count()) as u32
            + 1;
        Location::User {
            line: (idx - self.user_first_line) as u32 + 1,
            column,
        }
    }

    /// The user code slice of `text`, which must be position-preserving.
    pub fn user_slice<'t>(&self, text: &'t str) -> &'t str {
        text.get(self.user_start as usize..self.user_end as usize)
            .unwrap_or_default()
    }

    /// The original user code.
    pub fn code(&self) -> &str {
        self.user_slice(&self.text)
    }
}

fn line_index(line_starts: &[u32], offset: u32) -> usize {
    match line_starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_code_is_located_after_marker() {
        let unit = Unit::new("declare const tools: {};", "const a = 1;\nconst b = 2;");
        assert!(unit.text.contains(USER_CODE_MARKER));
        assert_eq!(unit.code(), "const a = 1;\nconst b = 2;");

        let b = unit.text.find("const b").unwrap() as u32;
        assert_eq!(unit.locate(b), Location::User { line: 2, column: 1 });
        assert_eq!(unit.locate(b + 6), Location::User { line: 2, column: 7 });
        assert_eq!(unit.locate(3), Location::Interface);
    }

    #[test]
    fn footer_offsets_clamp_to_last_line() {
        let unit = Unit::new("", "foo(");
        let end = unit.text.len() as u32 - 1;
        assert_eq!(unit.locate(end), Location::User { line: 1, column: 5 });
    }

    #[test]
    fn columns_count_characters() {
        let unit = Unit::new("", "const s = \"é\"; x");
        let x = unit.text.rfind('x').unwrap() as u32;
        assert_eq!(unit.locate(x), Location::User { line: 1, column: 16 });
    }
}
