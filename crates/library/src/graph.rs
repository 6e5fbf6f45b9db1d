use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use common::{DateRange, Uid};
use tracing::{debug, info};

use crate::interpret::{album_uid, artist_uid, PreAlbum, PreArtist, PreGenre, PrePlaylist, PreSong};
use crate::model::{Album, Artist, Genre, Library, Playlist, Song};

struct SongEntry {
    pre: PreSong,
    album: Uid,
    artists: Vec<Uid>,
    genres: Vec<Uid>,
}

struct AlbumBuilder {
    pre: PreAlbum,
    artists: Vec<Uid>,
    songs: Vec<Uid>,
    duration_ms: u64,
    added_ms: u64,
    dates: Option<DateRange>,
}

impl AlbumBuilder {
    fn new(pre: PreAlbum) -> Self {
        let artists = distinct(pre.pre_artists.iter().map(|artist| artist.uid));
        Self {
            pre,
            artists,
            songs: Vec::new(),
            duration_ms: 0,
            added_ms: u64::MAX,
            dates: None,
        }
    }

    fn link(&mut self, song: &PreSong) {
        self.songs.push(song.uid);
        self.duration_ms += song.duration_ms;
        self.added_ms = self.added_ms.min(song.added_ms);
        if let Some(date) = &song.date {
            match &mut self.dates {
                Some(range) => range.expand(date),
                None => self.dates = Some(DateRange::single(date.clone())),
            }
        }
    }

    fn absorb(&mut self, other: AlbumBuilder) {
        self.songs.extend(other.songs);
        self.duration_ms += other.duration_ms;
        self.added_ms = self.added_ms.min(other.added_ms);
        if let Some(range) = other.dates {
            match &mut self.dates {
                Some(dates) => {
                    dates.expand(&range.min);
                    dates.expand(&range.max);
                }
                None => self.dates = Some(range),
            }
        }
        self.artists = distinct(self.artists.iter().chain(&other.artists).copied());
    }
}

struct ArtistBuilder {
    pre: PreArtist,
    /// Song uid to duration.
    songs: BTreeMap<Uid, u64>,
}

impl ArtistBuilder {
    fn new(pre: PreArtist) -> Self {
        Self {
            pre,
            songs: BTreeMap::new(),
        }
    }

    fn link(&mut self, song: &PreSong) {
        self.songs.insert(song.uid, song.duration_ms);
    }

    fn absorb(&mut self, other: ArtistBuilder) {
        self.songs.extend(other.songs);
    }
}

struct GenreBuilder {
    pre: PreGenre,
    songs: Vec<Uid>,
    artists: BTreeSet<Uid>,
    duration_ms: u64,
}

impl GenreBuilder {
    fn new(pre: PreGenre) -> Self {
        Self {
            pre,
            songs: Vec::new(),
            artists: BTreeSet::new(),
            duration_ms: 0,
        }
    }

    fn link(&mut self, song: &PreSong, artists: &[Uid]) {
        self.songs.push(song.uid);
        self.duration_ms += song.duration_ms;
        self.artists.extend(artists.iter().copied());
    }
}

/// Links pre-entities into the music graph. Entities converge by uid, so the same album seen
/// from many songs becomes one album.
#[derive(Default)]
pub struct GraphBuilder {
    songs: BTreeMap<Uid, SongEntry>,
    albums: BTreeMap<Uid, AlbumBuilder>,
    artists: BTreeMap<Uid, ArtistBuilder>,
    genres: BTreeMap<Uid, GenreBuilder>,
    playlists: Vec<PrePlaylist>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn song_count(&self) -> usize {
        self.songs.len()
    }

    /// Registers and links a song. Returns false if a song with the same uid was already added.
    pub fn add_song(&mut self, song: PreSong) -> bool {
        if let Some(existing) = self.songs.get(&song.uid) {
            debug!(
                "Ignoring {} as a duplicate of {} ({})",
                song.file.path, existing.pre.file.path, song.uid
            );
            return false;
        }

        for pre in &song.pre_artists {
            self.artists
                .entry(pre.uid)
                .or_insert_with(|| ArtistBuilder::new(pre.clone()));
        }
        let artists = distinct(song.pre_artists.iter().map(|artist| artist.uid));
        let genres = distinct(song.pre_genres.iter().map(|genre| genre.uid));

        // Album artists are credited by whichever song creates the album.
        match self.albums.entry(song.pre_album.uid) {
            Entry::Occupied(mut album) => album.get_mut().link(&song),
            Entry::Vacant(slot) => {
                for pre in &song.pre_album.pre_artists {
                    self.artists
                        .entry(pre.uid)
                        .or_insert_with(|| ArtistBuilder::new(pre.clone()));
                }
                slot.insert(AlbumBuilder::new(song.pre_album.clone())).link(&song);
            }
        }
        for uid in &artists {
            if let Some(artist) = self.artists.get_mut(uid) {
                artist.link(&song);
            }
        }
        for pre in &song.pre_genres {
            self.genres
                .entry(pre.uid)
                .or_insert_with(|| GenreBuilder::new(pre.clone()));
        }
        for uid in &genres {
            if let Some(genre) = self.genres.get_mut(uid) {
                genre.link(&song, &artists);
            }
        }

        self.songs.insert(
            song.uid,
            SongEntry {
                album: song.pre_album.uid,
                artists,
                genres,
                pre: song,
            },
        );
        true
    }

    pub fn add_playlist(&mut self, playlist: PrePlaylist) {
        self.playlists.push(playlist);
    }

    /// Finalizes the graph. Consumes the builder, so linked entities can't be touched again.
    ///
    /// # Panics
    ///
    /// If an artist ends up with neither songs nor albums, or a genre without songs.
    pub fn build(mut self) -> Library {
        let artist_remap = self.simplify_artists();
        if !artist_remap.is_empty() {
            for song in self.songs.values_mut() {
                song.artists = remapped(&song.artists, &artist_remap);
            }
            for album in self.albums.values_mut() {
                album.artists = remapped(&album.artists, &artist_remap);
            }
            for genre in self.genres.values_mut() {
                genre.artists = genre
                    .artists
                    .iter()
                    .map(|uid| *artist_remap.get(uid).unwrap_or(uid))
                    .collect();
            }
        }
        let album_remap = self.simplify_albums();
        for song in self.songs.values_mut() {
            if let Some(target) = album_remap.get(&song.album) {
                song.album = *target;
            }
        }

        let songs = self.finish_songs();
        let albums = self.finish_albums();
        let artists = self.finish_artists(&albums);
        let genres = self.finish_genres();
        let playlists = self.finish_playlists();
        info!(
            "Built library with {} songs, {} albums, {} artists, {} genres and {} playlists",
            songs.len(),
            albums.len(),
            artists.len(),
            genres.len(),
            playlists.len()
        );
        Library::new(songs, albums, artists, genres, playlists)
    }

    /// Melds artists that share a name where only some carry MusicBrainz ids into the id-less
    /// identity. Returns the old to new uid mapping.
    fn simplify_artists(&mut self) -> HashMap<Uid, Uid> {
        let mut clusters: BTreeMap<String, Vec<Uid>> = BTreeMap::new();
        for (uid, artist) in &self.artists {
            if let Some(raw) = &artist.pre.raw_name {
                clusters.entry(raw.to_lowercase()).or_default().push(*uid);
            }
        }

        let mut remap = HashMap::new();
        for cluster in clusters.into_values() {
            let tagged = cluster
                .iter()
                .filter(|uid| self.artists[*uid].pre.music_brainz_id.is_some())
                .count();
            if tagged == 0 || tagged == cluster.len() {
                continue;
            }
            let target = artist_uid(self.artists[&cluster[0]].pre.raw_name.as_deref());
            for uid in cluster {
                if uid == target {
                    continue;
                }
                let Some(mut src) = self.artists.remove(&uid) else {
                    continue;
                };
                match self.artists.entry(target) {
                    Entry::Occupied(mut dst) => dst.get_mut().absorb(src),
                    Entry::Vacant(slot) => {
                        src.pre.uid = target;
                        src.pre.music_brainz_id = None;
                        slot.insert(src);
                    }
                }
                debug!("Melded artist {} into {}", uid, target);
                remap.insert(uid, target);
            }
        }
        remap
    }

    /// Same as [`Self::simplify_artists`] for albums, clustered by name and artist credit.
    fn simplify_albums(&mut self) -> HashMap<Uid, Uid> {
        let mut clusters: BTreeMap<(String, Vec<Uid>), Vec<Uid>> = BTreeMap::new();
        for (uid, album) in &self.albums {
            clusters
                .entry((album.pre.raw_name.to_lowercase(), album.artists.clone()))
                .or_default()
                .push(*uid);
        }

        let mut remap = HashMap::new();
        for cluster in clusters.into_values() {
            let tagged = cluster
                .iter()
                .filter(|uid| self.albums[*uid].pre.music_brainz_id.is_some())
                .count();
            if tagged == 0 || tagged == cluster.len() {
                continue;
            }
            let first = &self.albums[&cluster[0]].pre;
            let target = album_uid(&first.raw_name, &first.pre_artists);
            for uid in cluster {
                if uid == target {
                    continue;
                }
                let Some(mut src) = self.albums.remove(&uid) else {
                    continue;
                };
                match self.albums.entry(target) {
                    Entry::Occupied(mut dst) => dst.get_mut().absorb(src),
                    Entry::Vacant(slot) => {
                        src.pre.uid = target;
                        src.pre.music_brainz_id = None;
                        slot.insert(src);
                    }
                }
                debug!("Melded album {} into {}", uid, target);
                remap.insert(uid, target);
            }
        }
        remap
    }

    fn finish_songs(&self) -> Vec<Song> {
        self.songs
            .values()
            .map(|entry| {
                let pre = &entry.pre;
                Song {
                    uid: pre.uid,
                    file: pre.file.clone(),
                    name: pre.name.clone(),
                    track: pre.track,
                    disc: pre.disc,
                    disc_subtitle: pre.disc_subtitle.clone(),
                    date: pre.date.clone(),
                    duration_ms: pre.duration_ms,
                    mime_type: pre.mime_type.clone(),
                    bitrate_kbps: pre.bitrate_kbps,
                    sample_rate_hz: pre.sample_rate_hz,
                    replay_gain: pre.replay_gain,
                    cover_id: pre.cover_id.clone(),
                    added_ms: pre.added_ms,
                    album: entry.album,
                    artists: entry.artists.clone(),
                    genres: entry.genres.clone(),
                }
            })
            .collect()
    }

    fn finish_albums(&self) -> Vec<Album> {
        self.albums
            .values()
            .map(|album| {
                let mut songs: Vec<&SongEntry> =
                    album.songs.iter().filter_map(|uid| self.songs.get(uid)).collect();
                songs.sort_by(|a, b| {
                    (a.pre.disc, a.pre.track)
                        .cmp(&(b.pre.disc, b.pre.track))
                        .then_with(|| a.pre.name.cmp(&b.pre.name))
                });
                Album {
                    uid: album.pre.uid,
                    name: album.pre.name.clone(),
                    release_type: album.pre.release_type,
                    dates: album.dates.clone(),
                    duration_ms: album.duration_ms,
                    added_ms: album.added_ms,
                    cover_id: songs.iter().find_map(|song| song.pre.cover_id.clone()),
                    artists: album.artists.clone(),
                    songs: songs.iter().map(|song| song.pre.uid).collect(),
                }
            })
            .collect()
    }

    fn finish_artists(&self, albums: &[Album]) -> Vec<Artist> {
        let mut explicit: HashMap<Uid, BTreeSet<Uid>> = HashMap::new();
        for album in albums {
            for artist in &album.artists {
                explicit.entry(*artist).or_default().insert(album.uid);
            }
        }
        let mut song_albums: HashMap<Uid, BTreeSet<Uid>> = HashMap::new();
        let mut genre_counts: HashMap<Uid, HashMap<Uid, usize>> = HashMap::new();
        for song in self.songs.values() {
            for artist in &song.artists {
                song_albums.entry(*artist).or_default().insert(song.album);
                let counts = genre_counts.entry(*artist).or_default();
                for genre in &song.genres {
                    *counts.entry(*genre).or_default() += 1;
                }
            }
        }

        self.artists
            .values()
            .map(|artist| {
                let uid = artist.pre.uid;
                let explicit_albums = explicit.remove(&uid).unwrap_or_default();
                let implicit_albums: Vec<Uid> = song_albums
                    .remove(&uid)
                    .unwrap_or_default()
                    .difference(&explicit_albums)
                    .copied()
                    .collect();
                assert!(
                    !artist.songs.is_empty() || !explicit_albums.is_empty(),
                    "artist {} has no songs and no albums",
                    uid
                );

                let counts = genre_counts.remove(&uid).unwrap_or_default();
                let mut genres: Vec<Uid> = counts.keys().copied().collect();
                genres.sort_by(|a, b| self.genre_name_order(a, b));
                genres.sort_by(|a, b| counts[b].cmp(&counts[a]));

                let mut songs: Vec<Uid> = artist.songs.keys().copied().collect();
                songs.sort_by(|a, b| self.song_name_order(a, b));
                Artist {
                    uid,
                    name: artist.pre.name.clone(),
                    duration_ms: artist.songs.values().sum(),
                    songs,
                    explicit_albums: explicit_albums.into_iter().collect(),
                    implicit_albums,
                    genres,
                }
            })
            .collect()
    }

    fn finish_genres(&self) -> Vec<Genre> {
        self.genres
            .values()
            .map(|genre| {
                assert!(!genre.songs.is_empty(), "genre {} has no songs", genre.pre.uid);
                let mut songs = genre.songs.clone();
                songs.sort_by(|a, b| self.song_name_order(a, b));
                Genre {
                    uid: genre.pre.uid,
                    name: genre.pre.name.clone(),
                    songs,
                    artists: genre.artists.iter().copied().collect(),
                    duration_ms: genre.duration_ms,
                }
            })
            .collect()
    }

    fn finish_playlists(&self) -> Vec<Playlist> {
        let by_path: HashMap<&str, Uid> = self
            .songs
            .values()
            .map(|song| (song.pre.file.path.as_str(), song.pre.uid))
            .collect();
        self.playlists
            .iter()
            .map(|playlist| {
                let songs = playlist
                    .entries
                    .iter()
                    .filter_map(|entry| {
                        let found = by_path.get(entry.as_str()).copied();
                        if found.is_none() {
                            debug!("Playlist {} entry {} matched no song", playlist.name, entry);
                        }
                        found
                    })
                    .collect();
                Playlist {
                    uid: playlist.uid,
                    name: playlist.name.clone(),
                    songs,
                    imported_from: Some(playlist.file.uri.clone()),
                }
            })
            .collect()
    }

    fn song_name_order(&self, a: &Uid, b: &Uid) -> std::cmp::Ordering {
        let name = |uid: &Uid| self.songs.get(uid).map(|song| &song.pre.name);
        name(a).cmp(&name(b)).then_with(|| a.cmp(b))
    }

    fn genre_name_order(&self, a: &Uid, b: &Uid) -> std::cmp::Ordering {
        let name = |uid: &Uid| self.genres.get(uid).map(|genre| &genre.pre.name);
        name(a).cmp(&name(b)).then_with(|| a.cmp(b))
    }
}

fn distinct(uids: impl Iterator<Item = Uid>) -> Vec<Uid> {
    let mut seen = BTreeSet::new();
    uids.filter(|uid| seen.insert(*uid)).collect()
}

fn remapped(uids: &[Uid], remap: &HashMap<Uid, Uid>) -> Vec<Uid> {
    distinct(uids.iter().map(|uid| *remap.get(uid).unwrap_or(uid)))
}
