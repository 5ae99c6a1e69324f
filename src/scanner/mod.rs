use crate::error::{LabelAuditError, Result};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// 解析対象の画像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    /// 絶対パス
    pub path: PathBuf,
    pub file_name: String,
    /// 小文字の拡張子（jpg / jpeg / png）
    pub extension: String,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const TRANSCRIPT_EXTENSION: &str = "txt";

/// フォルダ直下の画像を列挙（ファイル名順）
pub fn scan_folder(folder: &Path) -> Result<Vec<SourceImage>> {
    if !folder.is_dir() {
        return Err(LabelAuditError::FolderNotFound(folder.display().to_string()));
    }
    let folder = absolute(folder)?;

    let mut images: Vec<SourceImage> = flat_files(&folder)
        .filter_map(|path| {
            let extension = lower_extension(&path)?;
            if !is_image_extension(&extension) {
                return None;
            }
            let file_name = path.file_name()?.to_string_lossy().to_string();
            Some(SourceImage {
                path,
                file_name,
                extension,
            })
        })
        .collect();

    // ファイル名でソート
    images.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    Ok(images)
}

/// トーク履歴（.txt）を探す
///
/// 複数ある場合はファイル名の辞書順で最初のものを使い、警告を出す。
pub fn find_transcript(folder: &Path) -> Result<Option<PathBuf>> {
    if !folder.is_dir() {
        return Err(LabelAuditError::FolderNotFound(folder.display().to_string()));
    }

    let mut transcripts: Vec<PathBuf> = flat_files(folder)
        .filter(|path| lower_extension(path).as_deref() == Some(TRANSCRIPT_EXTENSION))
        .collect();
    transcripts.sort();

    if transcripts.len() > 1 {
        tracing::warn!(
            count = transcripts.len(),
            chosen = %transcripts[0].display(),
            "トーク履歴ファイルが複数あります。辞書順で最初のものを使用します"
        );
    }

    Ok(transcripts.into_iter().next())
}

fn flat_files(folder: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1) // 直下のみ（再帰しない）
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

fn lower_extension(path: &Path) -> Option<String> {
    path.extension().map(|ext| ext.to_string_lossy().to_lowercase())
}

/// 絶対パス化（途中の `.` は取り除く）
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(joined
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect())
}

/// 対応画像拡張子か（大文字小文字を区別しない）
pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}
