use std::collections::HashMap;
use std::sync::Arc;

use common::{Date, DateRange, DeviceFile, MusicKind, ReplayGainAdjustment, Uid};
use metadata::ReleaseType;

use crate::naming::Name;

#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    pub uid: Uid,
    pub file: DeviceFile,
    pub name: Name,
    pub track: Option<u32>,
    pub disc: Option<u32>,
    pub disc_subtitle: Option<String>,
    pub date: Option<Date>,
    pub duration_ms: u64,
    pub mime_type: String,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub replay_gain: ReplayGainAdjustment,
    pub cover_id: Option<String>,
    pub added_ms: u64,
    pub album: Uid,
    pub artists: Vec<Uid>,
    pub genres: Vec<Uid>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Album {
    pub uid: Uid,
    pub name: Name,
    pub release_type: ReleaseType,
    /// Span of the dated songs. `None` when no song carries a date.
    pub dates: Option<DateRange>,
    pub duration_ms: u64,
    /// Earliest added time of any song.
    pub added_ms: u64,
    pub cover_id: Option<String>,
    pub artists: Vec<Uid>,
    /// Ordered by disc, then track.
    pub songs: Vec<Uid>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artist {
    pub uid: Uid,
    pub name: Name,
    pub songs: Vec<Uid>,
    /// Albums credited to this artist.
    pub explicit_albums: Vec<Uid>,
    /// Albums this artist only appears on through song credits. Disjoint from
    /// `explicit_albums`.
    pub implicit_albums: Vec<Uid>,
    /// Most frequent genre first.
    pub genres: Vec<Uid>,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Genre {
    pub uid: Uid,
    pub name: Name,
    pub songs: Vec<Uid>,
    pub artists: Vec<Uid>,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Playlist {
    pub uid: Uid,
    pub name: String,
    pub songs: Vec<Uid>,
    /// Uri of the playlist file this was read from.
    pub imported_from: Option<String>,
}

#[derive(Debug, Default)]
struct LibraryIndex {
    songs: HashMap<Uid, usize>,
    song_paths: HashMap<String, usize>,
    albums: HashMap<Uid, usize>,
    artists: HashMap<Uid, usize>,
    genres: HashMap<Uid, usize>,
}

/// An immutable snapshot of the indexed collection.
///
/// Cloning is cheap. Playlist mutations return a new snapshot sharing everything except the
/// playlists.
#[derive(Clone, Debug, Default)]
pub struct Library {
    songs: Arc<Vec<Song>>,
    albums: Arc<Vec<Album>>,
    artists: Arc<Vec<Artist>>,
    genres: Arc<Vec<Genre>>,
    playlists: Arc<Vec<Playlist>>,
    index: Arc<LibraryIndex>,
}

impl Library {
    pub(crate) fn new(
        mut songs: Vec<Song>,
        mut albums: Vec<Album>,
        mut artists: Vec<Artist>,
        mut genres: Vec<Genre>,
        playlists: Vec<Playlist>,
    ) -> Self {
        songs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uid.cmp(&b.uid)));
        albums.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uid.cmp(&b.uid)));
        artists.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uid.cmp(&b.uid)));
        genres.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uid.cmp(&b.uid)));

        let index = LibraryIndex {
            songs: positions(&songs, |song| song.uid),
            song_paths: songs
                .iter()
                .enumerate()
                .map(|(i, song)| (song.file.path.clone(), i))
                .collect(),
            albums: positions(&albums, |album| album.uid),
            artists: positions(&artists, |artist| artist.uid),
            genres: positions(&genres, |genre| genre.uid),
        };
        Self {
            songs: Arc::new(songs),
            albums: Arc::new(albums),
            artists: Arc::new(artists),
            genres: Arc::new(genres),
            playlists: Arc::new(sorted_playlists(playlists)),
            index: Arc::new(index),
        }
    }

    pub fn songs(&self) -> &[Song] {
        &self.songs
    }

    pub fn albums(&self) -> &[Album] {
        &self.albums
    }

    pub fn artists(&self) -> &[Artist] {
        &self.artists
    }

    pub fn genres(&self) -> &[Genre] {
        &self.genres
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty() && self.playlists.is_empty()
    }

    pub fn find_song(&self, uid: &Uid) -> Option<&Song> {
        self.index.songs.get(uid).map(|&i| &self.songs[i])
    }

    /// Looks a song up by its logical path.
    pub fn find_song_by_path(&self, path: &str) -> Option<&Song> {
        self.index.song_paths.get(path).map(|&i| &self.songs[i])
    }

    pub fn find_album(&self, uid: &Uid) -> Option<&Album> {
        self.index.albums.get(uid).map(|&i| &self.albums[i])
    }

    pub fn find_artist(&self, uid: &Uid) -> Option<&Artist> {
        self.index.artists.get(uid).map(|&i| &self.artists[i])
    }

    pub fn find_genre(&self, uid: &Uid) -> Option<&Genre> {
        self.index.genres.get(uid).map(|&i| &self.genres[i])
    }

    pub fn find_playlist(&self, uid: &Uid) -> Option<&Playlist> {
        self.playlists.iter().find(|playlist| playlist.uid == *uid)
    }

    pub fn find_playlist_by_name(&self, name: &str) -> Option<&Playlist> {
        self.playlists.iter().find(|playlist| playlist.name == name)
    }

    /// Adds a new user playlist. Songs not in the library are left out.
    pub fn create_playlist(&self, name: &str, songs: &[Uid]) -> (Library, Uid) {
        let playlist = Playlist {
            uid: Uid::random(MusicKind::Playlist),
            name: name.to_string(),
            songs: self.known_songs(songs),
            imported_from: None,
        };
        let uid = playlist.uid;
        let mut playlists = self.playlists.to_vec();
        playlists.push(playlist);
        (self.with_playlists(playlists), uid)
    }

    pub fn rename_playlist(&self, uid: &Uid, name: &str) -> Result<Library, PlaylistError> {
        self.edit_playlist(uid, |playlist| playlist.name = name.to_string())
    }

    /// Appends songs to the end of a playlist.
    pub fn add_to_playlist(&self, uid: &Uid, songs: &[Uid]) -> Result<Library, PlaylistError> {
        let songs = self.known_songs(songs);
        self.edit_playlist(uid, |playlist| playlist.songs.extend(songs))
    }

    /// Replaces a playlist's songs.
    pub fn rewrite_playlist(&self, uid: &Uid, songs: &[Uid]) -> Result<Library, PlaylistError> {
        let songs = self.known_songs(songs);
        self.edit_playlist(uid, |playlist| playlist.songs = songs)
    }

    pub fn delete_playlist(&self, uid: &Uid) -> Result<Library, PlaylistError> {
        let mut playlists = self.playlists.to_vec();
        let before = playlists.len();
        playlists.retain(|playlist| playlist.uid != *uid);
        if playlists.len() == before {
            return Err(PlaylistError::NotFound(*uid));
        }
        Ok(self.with_playlists(playlists))
    }

    fn edit_playlist(
        &self,
        uid: &Uid,
        edit: impl FnOnce(&mut Playlist),
    ) -> Result<Library, PlaylistError> {
        let mut playlists = self.playlists.to_vec();
        let playlist = playlists
            .iter_mut()
            .find(|playlist| playlist.uid == *uid)
            .ok_or(PlaylistError::NotFound(*uid))?;
        edit(playlist);
        Ok(self.with_playlists(playlists))
    }

    fn known_songs(&self, songs: &[Uid]) -> Vec<Uid> {
        songs
            .iter()
            .filter(|uid| self.index.songs.contains_key(*uid))
            .copied()
            .collect()
    }

    fn with_playlists(&self, playlists: Vec<Playlist>) -> Library {
        Library {
            playlists: Arc::new(sorted_playlists(playlists)),
            ..self.clone()
        }
    }
}

fn positions<T>(items: &[T], uid: impl Fn(&T) -> Uid) -> HashMap<Uid, usize> {
    items.iter().enumerate().map(|(i, item)| (uid(item), i)).collect()
}

fn sorted_playlists(mut playlists: Vec<Playlist>) -> Vec<Playlist> {
    playlists.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.uid.cmp(&b.uid))
    });
    playlists
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistError {
    NotFound(Uid),
}

impl std::fmt::Display for PlaylistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaylistError::NotFound(uid) => write!(f, "playlist not found: {}", uid),
        }
    }
}

impl std::error::Error for PlaylistError {}

#[cfg(test)]
mod tests {
    use super::{Library, PlaylistError, Song};
    use crate::naming::Naming;
    use common::{DeviceFile, MusicKind, ReplayGainAdjustment, Uid};

    fn song(name: &str) -> Song {
        let uid = Uid::hashed(MusicKind::Song, |h| {
            h.str(Some(name));
        });
        Song {
            uid,
            file: DeviceFile {
                uri: format!("file:///music/{}.mp3", name),
                mime_type: "audio/mpeg".to_string(),
                path: format!("Music/{}.mp3", name),
                size: 1,
                modified_ms: 1,
            },
            name: Naming::Intelligent.name(name, None),
            track: None,
            disc: None,
            disc_subtitle: None,
            date: None,
            duration_ms: 1000,
            mime_type: "audio/mpeg".to_string(),
            bitrate_kbps: None,
            sample_rate_hz: None,
            replay_gain: ReplayGainAdjustment::default(),
            cover_id: None,
            added_ms: 1,
            album: Uid::hashed(MusicKind::Album, |_| {}),
            artists: Vec::new(),
            genres: Vec::new(),
        }
    }

    fn library() -> Library {
        Library::new(
            vec![song("Song2"), song("Song1")],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn collections_are_sorted_and_indexed() {
        let library = library();
        let names: Vec<String> = library.songs().iter().map(|s| s.name.to_string()).collect();
        assert_eq!(names, ["Song1", "Song2"]);
        let first = &library.songs()[0];
        assert_eq!(library.find_song(&first.uid), Some(first));
        assert_eq!(library.find_song_by_path("Music/Song1.mp3"), Some(first));
        assert!(library.find_song_by_path("Music/Nope.mp3").is_none());
        assert!(!library.is_empty());
        assert!(Library::default().is_empty());
    }

    #[test]
    fn playlist_mutations_return_new_snapshots() {
        let library = library();
        let song1 = library.songs()[0].uid;
        let song2 = library.songs()[1].uid;
        let stranger = Uid::random(MusicKind::Song);

        let (created, uid) = library.create_playlist("Mix", &[song2, stranger]);
        assert!(library.playlists().is_empty());
        assert_eq!(created.find_playlist(&uid).unwrap().songs, [song2]);

        let added = created.add_to_playlist(&uid, &[song1]).unwrap();
        assert_eq!(added.find_playlist(&uid).unwrap().songs, [song2, song1]);

        let rewritten = added.rewrite_playlist(&uid, &[song1]).unwrap();
        assert_eq!(rewritten.find_playlist(&uid).unwrap().songs, [song1]);

        let renamed = rewritten.rename_playlist(&uid, "Road Trip").unwrap();
        assert_eq!(renamed.find_playlist_by_name("Road Trip").unwrap().uid, uid);
        assert!(renamed.find_playlist_by_name("Mix").is_none());
        assert_eq!(renamed.songs(), library.songs());

        let deleted = renamed.delete_playlist(&uid).unwrap();
        assert!(deleted.playlists().is_empty());
        assert_eq!(deleted.delete_playlist(&uid).unwrap_err(), PlaylistError::NotFound(uid));
    }
}
