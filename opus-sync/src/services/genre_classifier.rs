//! Genre Classifier
//!
//! Flags tracks belonging to the configured special genre (drum-and-bass by default).
//!
//! **Matching rules:**
//! 1. Any catalog artist genre or feed genre tag containing a marker
//!    (case-insensitive substring) ⇒ special
//! 2. Otherwise a marker appearing as whole word(s) in the title ⇒ special
//! 3. Anything else, including missing genre data ⇒ not special
//!
//! Artist names are never keyword-matched: "Jungle Brothers" is a hip-hop group.

use crate::models::NormalizedTrack;

/// Markers used when none are configured
pub const DEFAULT_SPECIAL_MARKERS: &[&str] = &[
    "drum and bass",
    "drum & bass",
    "drum n bass",
    "drum'n'bass",
    "dnb",
    "d&b",
    "jungle",
    "uk garage",
    "liquid funk",
    "neurofunk",
];

/// Case-insensitive marker matcher
#[derive(Debug, Clone)]
pub struct GenreClassifier {
    /// Lower-cased markers for tag matching
    markers: Vec<String>,
    /// Markers reduced to space-separated words for keyword matching
    keyword_markers: Vec<String>,
}

impl GenreClassifier {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers: Vec<String> = markers
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        let keyword_markers = markers
            .iter()
            .map(|m| words(m))
            .filter(|m| !m.is_empty())
            .collect();

        Self {
            markers,
            keyword_markers,
        }
    }

    /// Whether the feed data alone marks the track as special
    pub fn is_special(&self, track: &NormalizedTrack) -> bool {
        self.genres_match(&track.genre_tags) || self.keyword_matches(&track.title)
    }

    /// Whether any catalog genre or feed tag contains a marker
    pub fn genres_match<S: AsRef<str>>(&self, genres: &[S]) -> bool {
        genres.iter().any(|genre| self.tag_matches(genre.as_ref()))
    }

    /// Set the `special` flag on a track
    pub fn classify(&self, mut track: NormalizedTrack) -> NormalizedTrack {
        track.special = self.is_special(&track);
        if track.special {
            tracing::debug!(artist = %track.artist, title = %track.title, "Classified as special genre");
        }
        track
    }

    fn tag_matches(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.markers.iter().any(|m| tag.contains(m.as_str()))
    }

    fn keyword_matches(&self, text: &str) -> bool {
        let haystack = format!(" {} ", words(text));
        self.keyword_markers
            .iter()
            .any(|m| haystack.contains(&format!(" {} ", m)))
    }
}

impl Default for GenreClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SPECIAL_MARKERS)
    }
}

/// Lower-case and reduce to words separated by single spaces; '&' counts as a word
fn words(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '&' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn track(artist: &str, title: &str, tags: &[&str]) -> NormalizedTrack {
        NormalizedTrack {
            fingerprint: "fp".to_string(),
            artist: artist.to_string(),
            title: title.to_string(),
            aired_at: Utc::now(),
            genre_tags: tags.iter().map(|t| t.to_string()).collect(),
            special: false,
        }
    }

    #[test]
    fn test_tag_match_is_case_insensitive_substring() {
        let classifier = GenreClassifier::default();
        assert!(classifier.is_special(&track("A", "B", &["Drum & Bass"])));
        assert!(classifier.is_special(&track("A", "B", &["Liquid Drum and Bass"])));
        assert!(classifier.is_special(&track("A", "B", &["pop", "DNB"])));
        assert!(!classifier.is_special(&track("A", "B", &["pop", "rock"])));
    }

    #[test]
    fn test_keyword_fallback_on_title_only() {
        let classifier = GenreClassifier::default();
        assert!(classifier.is_special(&track("Someone", "Bassline (DnB Mix)", &[])));
        assert!(!classifier.is_special(&track("Jungle Brothers", "Because I Got It Like That", &[])));
        // Whole words only
        assert!(!classifier.is_special(&track("Someone", "Dnbx", &[])));
    }

    #[test]
    fn test_catalog_genres_match_markers() {
        let classifier = GenreClassifier::default();
        assert!(classifier.genres_match(&["uk dnb", "drum and bass"]));
        assert!(classifier.genres_match(&["Liquid Funk".to_string()]));
        assert!(!classifier.genres_match(&["hip hop", "old school hip hop"]));
        assert!(!classifier.genres_match::<&str>(&[]));
    }

    #[test]
    fn test_missing_genre_data_is_not_special() {
        let classifier = GenreClassifier::default();
        assert!(!classifier.is_special(&track("Artist", "Plain Song", &[])));
    }

    #[test]
    fn test_custom_markers() {
        let classifier = GenreClassifier::new(["Techno", "  "]);
        assert!(classifier.is_special(&track("A", "B", &["minimal techno"])));
        assert!(!classifier.is_special(&track("A", "B", &["dnb"])));
    }

    #[test]
    fn test_classify_sets_flag() {
        let classifier = GenreClassifier::default();
        let classified = classifier.classify(track("A", "B", &["jungle"]));
        assert!(classified.special);
    }
}
