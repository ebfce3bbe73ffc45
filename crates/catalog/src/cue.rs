//! Cue sheet track references.
//!
//! Only `FILE` commands matter to the importer: they name the track images
//! that have to travel together with the sheet.

use std::path::{Component, Path, PathBuf};

/// Extracts the file names referenced by `FILE` commands, in order and
/// without duplicates.
///
/// Both quoted (`FILE "Track 01.bin" BINARY`) and bare (`FILE track.bin
/// BINARY`) forms are accepted. Malformed lines are ignored, and so are
/// names that point anywhere but the sheet's own directory.
pub fn referenced_files(sheet: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for line in sheet.lines() {
        let line = line.trim();
        let Some(rest) = line.get(..5).filter(|head| head.eq_ignore_ascii_case("FILE ")).map(|_| line[5..].trim_start())
        else {
            continue;
        };
        let name = match rest.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => &quoted[..end],
                None => continue,
            },
            // Bare names end at the file type keyword.
            None => match rest.rsplit_once(char::is_whitespace) {
                Some((name, _kind)) => name.trim_end(),
                None => rest,
            },
        };
        if !is_plain_file_name(name) {
            continue;
        }
        if !files.iter().any(|seen| seen == name) {
            files.push(name.to_string());
        }
    }
    files
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

/// Resolves the tracks of the sheet at `sheet_path` against the sheet's own
/// directory.
pub fn companion_paths(sheet_path: impl AsRef<Path>, sheet: &str) -> Vec<PathBuf> {
    let dir = sheet_path.as_ref().parent().unwrap_or_else(|| Path::new(""));
    referenced_files(sheet).into_iter().map(|name| dir.join(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"REM GENRE "RPG"
FILE "Final Fantasy VII (Track 01).bin" BINARY
  TRACK 01 MODE2/2352
    INDEX 01 00:00:00
file "Final Fantasy VII (Track 02).bin" BINARY
  TRACK 02 AUDIO
    INDEX 00 00:00:00
FILE track03.bin BINARY
  TRACK 03 AUDIO
FILE "Final Fantasy VII (Track 01).bin" BINARY
"#;

    #[test]
    fn test_referenced_files() {
        assert_eq!(
            referenced_files(SHEET),
            ["Final Fantasy VII (Track 01).bin", "Final Fantasy VII (Track 02).bin", "track03.bin"]
        );
    }

    #[test]
    fn test_malformed_lines_are_ignored() {
        assert!(referenced_files("FILE \"unterminated.bin BINARY\nFILE\nTRACK 01 AUDIO\n").is_empty());
    }

    #[test]
    fn test_names_outside_the_sheet_directory_are_ignored() {
        let sheet = "FILE \"../ROMs/snes/x.bin\" BINARY\nFILE /etc/passwd BINARY\nFILE \"sub/t.bin\" BINARY\nFILE \"..\" BINARY\nFILE \"ok.bin\" BINARY\n";
        assert_eq!(referenced_files(sheet), ["ok.bin"]);
        assert_eq!(companion_paths("Conflicts/x.cue", sheet), [PathBuf::from("Conflicts/ok.bin")]);
    }

    #[test]
    fn test_companion_paths() {
        let paths = companion_paths("Imports/ff7.cue", "FILE \"ff7.bin\" BINARY\r\n");
        assert_eq!(paths, [PathBuf::from("Imports/ff7.bin")]);
        let paths = companion_paths("ff7.cue", "FILE \"ff7.bin\" BINARY");
        assert_eq!(paths, [PathBuf::from("ff7.bin")]);
    }
}
