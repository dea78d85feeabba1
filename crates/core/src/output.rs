//! Output artifact descriptors and resolution rules.

use serde::{Deserialize, Serialize};

/// Log marker printed by the pipeline once the final video is written.
pub const FINAL_VIDEO_MARKER: &str = "final video at:";

/// A file produced by a job, as reported by the node's listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl OutputDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            path: None,
        }
    }
}

/// Scan execution log text from the last line backward for the final
/// video marker. The most recent match wins. Matching is
/// case-insensitive; surrounding whitespace and quotes are stripped.
pub fn resolve_output_from_logs(log: &str) -> Option<String> {
    log.lines().rev().find_map(|line| {
        let lower = line.to_ascii_lowercase();
        let idx = lower.find(FINAL_VIDEO_MARKER)?;
        let rest = &line[idx + FINAL_VIDEO_MARKER.len()..];
        let path = rest.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        (!path.is_empty()).then(|| path.to_string())
    })
}

/// The file a download refers to: the named one when given, otherwise the
/// first listed file.
pub fn canonical_output<'a>(
    files: &'a [OutputDescriptor],
    requested: Option<&str>,
) -> Option<&'a OutputDescriptor> {
    match requested {
        Some(name) => files.iter().find(|f| f.name == name),
        None => files.first(),
    }
}

/// Final path component of a local or remote path.
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// MIME type served for a downloaded artifact, by extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => "video/mp4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Log resolution --

    #[test]
    fn later_marker_wins() {
        let log = "\
Loading models
Final video at: /workspace/output/first.mp4
retrying upscale pass
Final video at: /workspace/output/second.mp4
done";
        assert_eq!(
            resolve_output_from_logs(log).as_deref(),
            Some("/workspace/output/second.mp4")
        );
    }

    #[test]
    fn marker_is_case_insensitive_and_unquoted() {
        let log = "[pipeline] FINAL VIDEO AT: \"/workspace/out.mp4\"  ";
        assert_eq!(
            resolve_output_from_logs(log).as_deref(),
            Some("/workspace/out.mp4")
        );
    }

    #[test]
    fn missing_or_empty_marker_yields_none() {
        assert_eq!(resolve_output_from_logs("no marker here"), None);
        assert_eq!(resolve_output_from_logs("final video at:   "), None);
        assert_eq!(resolve_output_from_logs(""), None);
    }

    // -- Canonical output --

    #[test]
    fn first_file_is_canonical_when_unnamed() {
        let files = vec![OutputDescriptor::named("out.mp4"), OutputDescriptor::named("b.mp4")];
        assert_eq!(canonical_output(&files, None).unwrap().name, "out.mp4");
        assert_eq!(canonical_output(&files, Some("b.mp4")).unwrap().name, "b.mp4");
        assert!(canonical_output(&files, Some("c.mp4")).is_none());
        assert!(canonical_output(&[], None).is_none());
    }

    // -- Content types --

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for("a.MP4"), "video/mp4");
        assert_eq!(content_type_for("a.avi"), "video/x-msvideo");
        assert_eq!(content_type_for("a.mov"), "video/quicktime");
        assert_eq!(content_type_for("a.mkv"), "video/x-matroska");
        assert_eq!(content_type_for("a.webm"), "video/webm");
        assert_eq!(content_type_for("noext"), "video/mp4");
    }

    #[test]
    fn file_name_takes_last_component() {
        assert_eq!(file_name("/workspace/output/x.mp4"), "x.mp4");
        assert_eq!(file_name("x.mp4"), "x.mp4");
    }
}
