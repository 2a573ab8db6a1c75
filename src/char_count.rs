use crate::types::Page;

/// Counts the characters of one OCR line that matter for reading statistics.
pub(crate) trait CharCounter: Send + Sync {
    fn count(&self, line: &str) -> usize;
}

/// Letters and digits of any script (kana, kanji, latin, fullwidth forms).
/// Whitespace, punctuation and symbols such as `…` or `！` are not counted.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MeaningfulChars;

impl CharCounter for MeaningfulChars {
    fn count(&self, line: &str) -> usize {
        line.chars().filter(|c| c.is_alphanumeric()).count()
    }
}

/// Unicode scalar count, no filtering.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RawLength;

impl CharCounter for RawLength {
    fn count(&self, line: &str) -> usize {
        line.chars().count()
    }
}

/// Running character totals: `out[i]` covers pages `0..=i`.
pub(crate) fn calculate_cumulative_char_counts(pages: &[Page], counter: &dyn CharCounter) -> Vec<u64> {
    let mut total = 0u64;
    pages
        .iter()
        .map(|page| {
            let page_chars: u64 = page
                .blocks
                .iter()
                .flat_map(|block| block.lines.iter())
                .map(|line| counter.count(line) as u64)
                .sum();
            total += page_chars;
            total
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{text_page, TextBlock};

    #[test]
    fn raw_length_prefix_sums() {
        let pages = vec![text_page("1.png", &["AB"]), text_page("2.png", &["CDE"])];
        assert_eq!(calculate_cumulative_char_counts(&pages, &RawLength), vec![2, 5]);
    }

    #[test]
    fn counts_are_monotonic_and_page_aligned() {
        let mut pages = vec![
            text_page("1.png", &["「こんにちは」", "…"]),
            text_page("2.png", &[]),
            text_page("3.png", &["ＡＢＣ１２３！"]),
        ];
        pages[1].blocks.clear();
        pages.push(Page {
            img_width: 10,
            img_height: 10,
            img_path: "4.png".into(),
            blocks: vec![
                TextBlock {
                    bbox: [0.0; 4],
                    vertical: false,
                    font_size: 12.0,
                    lines: vec!["漢字".into()],
                },
                TextBlock {
                    bbox: [0.0; 4],
                    vertical: true,
                    font_size: 12.0,
                    lines: vec!["かな".into(), "  ".into()],
                },
            ],
        });

        let counts = calculate_cumulative_char_counts(&pages, &MeaningfulChars);
        assert_eq!(counts.len(), pages.len());
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(counts, vec![5, 5, 11, 15]);
    }

    #[test]
    fn no_pages_no_counts() {
        assert!(calculate_cumulative_char_counts(&[], &MeaningfulChars).is_empty());
    }
}
