//! Workbook file primitives backing the registered tools.
//!
//! Every operation opens the file, mutates it and saves it again. Nothing is
//! cached between calls, and concurrent calls against one path are not
//! serialized.

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};
use umya_spreadsheet::Spreadsheet;
use umya_spreadsheet::reader::xlsx;

const SUPPORTED_EXTENSIONS: &[&str] = &["xlsx", "xlsm"];
const MAX_SHEET_NAME_LEN: usize = 31;
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];
const MAX_COLUMN: u32 = 16_384;
const MAX_ROW: u32 = 1_048_576;

static CELL_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]{1,3})([0-9]{1,7})$").expect("valid cell regex"));

/// Resolves a caller-supplied workbook path against the workspace root.
///
/// Relative paths are joined to `root`; absolute paths must already live
/// under it. Parent-directory components are rejected outright.
pub fn resolve_workbook_path(root: &Path, raw: &str) -> Result<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("workbook path must not be empty");
    }
    if trimmed.contains('\0') {
        bail!("workbook path {trimmed:?} contains a NUL byte");
    }

    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        bail!("workbook path {trimmed:?} escapes the workspace");
    }

    let resolved = if candidate.is_absolute() {
        if !candidate.starts_with(root) {
            bail!("workbook path {trimmed:?} is outside the workspace");
        }
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let extension = resolved
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        bail!(
            "workbook path {trimmed:?} must end in one of: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        );
    }

    Ok(resolved)
}

/// Case- and surrounding-whitespace-insensitive key for sheet lookups.
pub fn sheet_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Finds the stored name of the sheet matching `requested` under [`sheet_key`].
pub fn find_sheet_name(book: &Spreadsheet, requested: &str) -> Option<String> {
    let wanted = sheet_key(requested);
    book.get_sheet_collection()
        .iter()
        .map(|sheet| sheet.get_name())
        .find(|name| sheet_key(name) == wanted)
        .map(str::to_string)
}

pub fn sheet_names(book: &Spreadsheet) -> Vec<String> {
    book.get_sheet_collection()
        .iter()
        .map(|sheet| sheet.get_name().to_string())
        .collect()
}

fn validate_sheet_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        bail!("sheet name must not be empty");
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        bail!("sheet name {name:?} is longer than {MAX_SHEET_NAME_LEN} characters");
    }
    if let Some(ch) = name.chars().find(|ch| FORBIDDEN_SHEET_CHARS.contains(ch)) {
        bail!("sheet name {name:?} contains forbidden character {ch:?}");
    }
    Ok(name)
}

fn read_book(path: &Path) -> Result<Spreadsheet> {
    xlsx::read(path).with_context(|| format!("failed to read workbook {:?}", path))
}

fn write_book(book: &Spreadsheet, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {:?}", parent))?;
        }
    }
    umya_spreadsheet::writer::xlsx::write(book, path)
        .with_context(|| format!("failed to write workbook {:?}", path))
}

/// A workbook holding exactly one sheet, with no library default left behind.
fn new_book_with_sheet(sheet_name: &str) -> Result<Spreadsheet> {
    let mut book = umya_spreadsheet::new_file_empty_worksheet();
    book.new_sheet(sheet_name)
        .map_err(|e| anyhow!("failed to create sheet {sheet_name:?}: {e}"))?;
    Ok(book)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetCreated {
    pub sheet_name: String,
    /// True when the workbook file did not exist before the call.
    pub created_workbook: bool,
}

/// Adds `sheet_name` to the workbook at `path`, creating the file when absent.
pub fn create_sheet(path: &Path, sheet_name: &str) -> Result<SheetCreated> {
    let sheet_name = validate_sheet_name(sheet_name)?;

    if !path.exists() {
        let book = new_book_with_sheet(sheet_name)?;
        write_book(&book, path)?;
        return Ok(SheetCreated {
            sheet_name: sheet_name.to_string(),
            created_workbook: true,
        });
    }

    let mut book = read_book(path)?;
    if let Some(existing) = find_sheet_name(&book, sheet_name) {
        bail!("sheet {existing:?} already exists in {:?}", path);
    }
    book.new_sheet(sheet_name)
        .map_err(|e| anyhow!("failed to create sheet {sheet_name:?}: {e}"))?;
    write_book(&book, path)?;

    Ok(SheetCreated {
        sheet_name: sheet_name.to_string(),
        created_workbook: false,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWritten {
    /// Name of the sheet actually written, which may differ in case or
    /// padding from the requested one.
    pub sheet_name: String,
    /// Canonical upper-case A1 address that was written.
    pub cell: String,
    pub created_sheet: bool,
    pub created_workbook: bool,
}

/// Writes `value` into `cell`, resolving the sheet by [`sheet_key`] and
/// creating it when no sheet matches.
pub fn write_cell(
    path: &Path,
    sheet_name: &str,
    cell: &str,
    value: &str,
    create_missing_workbook: bool,
) -> Result<CellWritten> {
    let cell = normalize_cell_address(cell)?;
    let requested = validate_sheet_name(sheet_name)?;

    let (mut book, created_workbook) = if path.exists() {
        (read_book(path)?, false)
    } else if create_missing_workbook {
        (new_book_with_sheet(requested)?, true)
    } else {
        bail!("workbook {:?} does not exist", path);
    };

    let (target, created_sheet) = match find_sheet_name(&book, requested) {
        Some(existing) => (existing, false),
        None => {
            book.new_sheet(requested)
                .map_err(|e| anyhow!("failed to create sheet {requested:?}: {e}"))?;
            (requested.to_string(), true)
        }
    };

    book.get_sheet_by_name_mut(&target)
        .ok_or_else(|| anyhow!("sheet {target:?} not found after lookup"))?
        .get_cell_mut(cell.as_str())
        .set_value(value);
    write_book(&book, path)?;

    Ok(CellWritten {
        sheet_name: target,
        cell,
        created_sheet,
        created_workbook,
    })
}

/// Upper-cases an A1 address and checks it names a cell inside the sheet
/// grid (`A1` through `XFD1048576`).
pub fn normalize_cell_address(cell: &str) -> Result<String> {
    let address = cell.trim().to_ascii_uppercase();
    let Some(captures) = CELL_ADDRESS.captures(&address) else {
        bail!("invalid cell address {cell:?}");
    };
    let column = captures[1]
        .bytes()
        .fold(0u32, |acc, letter| acc * 26 + u32::from(letter - b'A' + 1));
    let row: u32 = captures[2]
        .parse()
        .map_err(|_| anyhow!("invalid cell address {cell:?}"))?;
    if column > MAX_COLUMN || row == 0 || row > MAX_ROW {
        bail!("cell address {cell:?} is outside the sheet grid");
    }
    Ok(address)
}

/// Standard base64 of the file's bytes, for shipping the workbook back to clients.
pub fn encode_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {:?}", path))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
