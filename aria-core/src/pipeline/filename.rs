//! Filename construction: the request's template with six placeholders,
//! then sanitisation that holds for every target filesystem.

const MAX_FILENAME_CHARS: usize = 200;
pub const DEFAULT_TEMPLATE: &str = "{artist} - {title}";

#[derive(Debug, Clone, Default)]
pub struct TemplateFields {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub track_number: u32,
    pub disc_number: u32,
    /// Release date in whatever granularity the source carried.
    pub release_date: String,
}

fn year_of(release_date: &str) -> String {
    release_date.chars().take(4).filter(|c| c.is_ascii_digit()).collect()
}

/// Expand `{title}`, `{artist}`, `{album}`, `{track:02}`, `{year}` and
/// `{disc}`. Missing values expand to empty; the track number is zero-padded
/// to two digits.
pub fn render_template(template: &str, fields: &TemplateFields) -> String {
    let template = if template.trim().is_empty() {
        DEFAULT_TEMPLATE
    } else {
        template
    };
    let track = if fields.track_number > 0 {
        format!("{:02}", fields.track_number)
    } else {
        String::new()
    };
    let disc = if fields.disc_number > 0 {
        fields.disc_number.to_string()
    } else {
        String::new()
    };
    template
        .replace("{title}", &fields.title)
        .replace("{artist}", &fields.artist)
        .replace("{album}", &fields.album)
        .replace("{track:02}", &track)
        .replace("{track}", &track)
        .replace("{year}", &year_of(&fields.release_date))
        .replace("{disc}", &disc)
}

/// Strip path-hostile characters: `<>:"/\|?*` and control bytes become `_`,
/// replacement runs collapse, leading/trailing dots and spaces are trimmed,
/// length is capped at 200 chars. Never returns an empty name.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_replacement = false;
    for c in name.chars() {
        let invalid = matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
            || c.is_control();
        if invalid {
            if !last_was_replacement {
                out.push('_');
                last_was_replacement = true;
            }
        } else {
            out.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed: String = out
        .trim_matches(|c: char| c == '.' || c == ' ')
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();
    // The cap can expose a fresh trailing dot or space.
    let trimmed = trimmed.trim_end_matches(|c: char| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Template expansion plus sanitisation in one step.
pub fn build_filename(template: &str, fields: &TemplateFields) -> String {
    sanitize_filename(render_template(template, fields).trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> TemplateFields {
        TemplateFields {
            title: "Bohemian Rhapsody".to_string(),
            artist: "Queen".to_string(),
            album: "A Night at the Opera".to_string(),
            track_number: 3,
            disc_number: 1,
            release_date: "1975-11-21".to_string(),
        }
    }

    #[test]
    fn default_template() {
        assert_eq!(build_filename("", &fields()), "Queen - Bohemian Rhapsody");
    }

    #[test]
    fn all_placeholders() {
        let name = render_template("{track:02} {artist} - {title} ({album}, {year}) d{disc}", &fields());
        assert_eq!(name, "03 Queen - Bohemian Rhapsody (A Night at the Opera, 1975) d1");
    }

    #[test]
    fn missing_values_expand_empty() {
        let empty = TemplateFields::default();
        assert_eq!(render_template("{track:02}{year}{disc}", &empty), "");
        assert_eq!(build_filename("{artist} - {title}", &empty), "-");
    }

    #[test]
    fn sanitization_properties() {
        let dirty = "AC/DC: \"Back\\In|Black\"?<>*";
        let clean = sanitize_filename(dirty);
        for c in ['<', '>', ':', '"', '/', '\\', '|', '?', '*'] {
            assert!(!clean.contains(c), "{clean} still contains {c}");
        }
        // The trailing `"?<>*` run collapses into a single replacement.
        assert_eq!(clean, "AC_DC_ _Back_In_Black_");

        // Control bytes collapse into one underscore with neighbours.
        assert_eq!(sanitize_filename("a\x00\x01//b"), "a_b");

        // Leading/trailing dots and spaces are trimmed.
        assert_eq!(sanitize_filename("  ..name.. "), "name");

        // Length cap.
        let long = "x".repeat(400);
        assert_eq!(sanitize_filename(&long).chars().count(), 200);

        // Never empty.
        assert_eq!(sanitize_filename("???"), "untitled");
        assert_eq!(sanitize_filename(" . . "), "untitled");
        assert_eq!(sanitize_filename(""), "untitled");
    }

    #[test]
    fn year_extraction_granularities() {
        assert_eq!(year_of("1975-11-21"), "1975");
        assert_eq!(year_of("1975-11"), "1975");
        assert_eq!(year_of("1975"), "1975");
        assert_eq!(year_of(""), "");
    }
}
