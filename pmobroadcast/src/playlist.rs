//! M3U playlist loading and cyclic traversal

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::PlaylistError;

/// Ordered, non-empty list of track paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    source: Option<PathBuf>,
    entries: Vec<PathBuf>,
}

impl Playlist {
    /// Reads an M3U/M3U8 file
    ///
    /// Comment lines (`#...`, including `#EXTINF`) and blank lines are
    /// ignored. Relative entries are resolved against the playlist's own
    /// directory.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PlaylistError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PlaylistError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let entries = parse_m3u(&text, base);
        if entries.is_empty() {
            return Err(PlaylistError::Empty(path.to_path_buf()));
        }

        Ok(Self {
            source: Some(path.to_path_buf()),
            entries,
        })
    }

    /// Builds a playlist that is not backed by a file (never reloaded)
    pub fn from_entries(entries: Vec<PathBuf>) -> Result<Self, PlaylistError> {
        if entries.is_empty() {
            return Err(PlaylistError::Empty(PathBuf::from("<inline>")));
        }
        Ok(Self {
            source: None,
            entries,
        })
    }

    /// File the playlist was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_m3u(text: &str, base: &Path) -> Vec<PathBuf> {
    text.trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let entry = Path::new(line);
            if entry.is_absolute() || line.contains("://") {
                entry.to_path_buf()
            } else {
                base.join(entry)
            }
        })
        .collect()
}

/// What happens after the last entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Wrap around to the first entry
    #[default]
    Loop,
    /// Play the list once, then stay silent until shutdown
    Once,
}

impl FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "loop" | "cycle" => Ok(Self::Loop),
            "once" => Ok(Self::Once),
            other => Err(format!("unknown playback mode '{other}' (expected loop or once)")),
        }
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loop => f.write_str("loop"),
            Self::Once => f.write_str("once"),
        }
    }
}

/// Result of [`PlaylistCursor::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next,
    /// Went past the last entry back to the first
    Wrapped,
    /// `Once` mode: nothing left to play
    Exhausted,
}

/// Position in a playlist
#[derive(Debug, Clone)]
pub struct PlaylistCursor {
    playlist: Playlist,
    position: usize,
    mode: PlaybackMode,
    exhausted: bool,
}

impl PlaylistCursor {
    pub fn new(playlist: Playlist, mode: PlaybackMode) -> Self {
        Self {
            playlist,
            position: 0,
            mode,
            exhausted: false,
        }
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    /// Entry to play, `None` once a `Once` playlist is exhausted
    pub fn current(&self) -> Option<&Path> {
        if self.exhausted {
            return None;
        }
        self.playlist.entries.get(self.position).map(PathBuf::as_path)
    }

    pub fn advance(&mut self) -> Advance {
        if self.exhausted {
            return Advance::Exhausted;
        }
        if self.position + 1 < self.playlist.len() {
            self.position += 1;
            return Advance::Next;
        }
        match self.mode {
            PlaybackMode::Loop => {
                self.position = 0;
                Advance::Wrapped
            }
            PlaybackMode::Once => {
                self.exhausted = true;
                Advance::Exhausted
            }
        }
    }

    /// Swaps in fresh contents and restarts from the first entry
    pub fn replace(&mut self, playlist: Playlist) {
        self.playlist = playlist;
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let text = "#EXTM3U\n\n#EXTINF:123,Artist - Title\na.mp3\n   \n  sub/b.mp3  \r\n/abs/c.mp3\nhttp://host/d.mp3\n";
        let entries = parse_m3u(text, Path::new("/music"));
        assert_eq!(
            entries,
            paths(&["/music/a.mp3", "/music/sub/b.mp3", "/abs/c.mp3", "http://host/d.mp3"])
        );
    }

    #[test]
    fn test_parse_strips_bom() {
        let entries = parse_m3u("\u{feff}a.mp3\n", Path::new("/x"));
        assert_eq!(entries, paths(&["/x/a.mp3"]));
    }

    #[tokio::test]
    async fn test_load_resolves_against_playlist_dir() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("radio.m3u");
        std::fs::write(&list, "# comment\na.mp3\nmissing.mp3\n").unwrap();

        let playlist = Playlist::load(&list).await.unwrap();
        assert_eq!(playlist.source(), Some(list.as_path()));
        assert_eq!(
            playlist.entries(),
            &[dir.path().join("a.mp3"), dir.path().join("missing.mp3")]
        );
    }

    #[tokio::test]
    async fn test_load_empty_playlist_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("empty.m3u");
        std::fs::write(&list, "#EXTM3U\n\n# nothing here\n").unwrap();

        assert!(matches!(
            Playlist::load(&list).await,
            Err(PlaylistError::Empty(_))
        ));
    }

    #[tokio::test]
    async fn test_load_missing_playlist_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Playlist::load(dir.path().join("nope.m3u")).await,
            Err(PlaylistError::Io { .. })
        ));
    }

    #[test]
    fn test_loop_cursor_wraps() {
        let playlist = Playlist::from_entries(paths(&["a", "b"])).unwrap();
        let mut cursor = PlaylistCursor::new(playlist, PlaybackMode::Loop);

        assert_eq!(cursor.current(), Some(Path::new("a")));
        assert_eq!(cursor.advance(), Advance::Next);
        assert_eq!(cursor.current(), Some(Path::new("b")));
        assert_eq!(cursor.advance(), Advance::Wrapped);
        assert_eq!(cursor.current(), Some(Path::new("a")));
    }

    #[test]
    fn test_single_entry_loop_wraps_every_time() {
        let playlist = Playlist::from_entries(paths(&["only"])).unwrap();
        let mut cursor = PlaylistCursor::new(playlist, PlaybackMode::Loop);
        for _ in 0..3 {
            assert_eq!(cursor.advance(), Advance::Wrapped);
            assert_eq!(cursor.current(), Some(Path::new("only")));
        }
    }

    #[test]
    fn test_once_cursor_is_exhausted() {
        let playlist = Playlist::from_entries(paths(&["a", "b"])).unwrap();
        let mut cursor = PlaylistCursor::new(playlist, PlaybackMode::Once);

        assert_eq!(cursor.advance(), Advance::Next);
        assert_eq!(cursor.advance(), Advance::Exhausted);
        assert_eq!(cursor.current(), None);
        assert_eq!(cursor.advance(), Advance::Exhausted);
    }

    #[test]
    fn test_replace_restarts_from_first_entry() {
        let playlist = Playlist::from_entries(paths(&["a", "b"])).unwrap();
        let mut cursor = PlaylistCursor::new(playlist, PlaybackMode::Loop);
        cursor.advance();

        cursor.replace(Playlist::from_entries(paths(&["c"])).unwrap());
        assert_eq!(cursor.position(), 0);
        assert_eq!(cursor.current(), Some(Path::new("c")));
    }

    #[test]
    fn test_empty_entries_rejected() {
        assert!(Playlist::from_entries(Vec::new()).is_err());
    }

    #[test]
    fn test_playback_mode_parsing() {
        assert_eq!("LOOP".parse::<PlaybackMode>().unwrap(), PlaybackMode::Loop);
        assert_eq!(" once ".parse::<PlaybackMode>().unwrap(), PlaybackMode::Once);
        assert!("shuffle".parse::<PlaybackMode>().is_err());
        assert_eq!(PlaybackMode::Once.to_string(), "once");
    }
}
