use {relay_common::UploadKind, std::path::Path};

/// Extensions uploaded as streamable video.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "mov", "avi", "webm", "m4v", "flv", "wmv", "3gp", "ts",
];

/// Pick the upload kind from the file name's extension (case-insensitive).
pub fn upload_kind(file_name: &str) -> UploadKind {
    let is_video = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|v| v.eq_ignore_ascii_case(ext))
        });
    if is_video {
        UploadKind::Video
    } else {
        UploadKind::Document
    }
}
