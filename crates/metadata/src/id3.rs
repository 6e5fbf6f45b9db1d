/// Expands ID3 style genre values into genre names.
///
/// A single value may pack several genres, as in `(17)(RX)Shoegaze`. Several values are only
/// mapped through the ID3v1 table. Returns `None` when a single value isn't ID3 formatted, in
/// which case the caller should fall back to its own splitting.
pub fn parse_id3_genre_names(values: &[String]) -> Option<Vec<String>> {
    match values {
        [single] => parse_v1(single)
            .map(|genre| vec![genre.to_string()])
            .or_else(|| parse_v2(single)),
        _ => Some(
            values
                .iter()
                .map(|value| parse_v1(value).map_or_else(|| value.clone(), str::to_string))
                .collect(),
        ),
    }
}

fn parse_v1(value: &str) -> Option<&'static str> {
    match value {
        "CR" => Some("Cover"),
        "RX" => Some("Remix"),
        _ => value
            .parse::<usize>()
            .ok()
            .and_then(|index| GENRE_TABLE.get(index).copied()),
    }
}

fn parse_v2(value: &str) -> Option<Vec<String>> {
    let mut genres: Vec<String> = Vec::new();
    let mut push = |genre: String| {
        if !genres.contains(&genre) {
            genres.push(genre);
        }
    };

    // Leading run of "(id)" groups, where id is a number, RX or CR.
    let mut rest = value;
    while let Some(inner) = rest.strip_prefix('(') {
        let Some(end) = inner.find(')') else {
            break;
        };
        let id = &inner[..end];
        let is_id =
            id == "RX" || id == "CR" || (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()));
        if !is_id {
            break;
        }
        if let Some(genre) = parse_v1(id) {
            push(genre.to_string());
        }
        rest = &inner[end + 1..];
    }

    // Whatever follows is a plain name, with "((" escaping a literal parenthesis.
    if !rest.is_empty() {
        match rest.strip_prefix('(') {
            Some(unescaped) if rest.starts_with("((") => push(unescaped.to_string()),
            _ => push(rest.to_string()),
        }
    }

    if genres.len() == 1 && genres[0] == value {
        return None;
    }
    Some(genres)
}

/// ID3v1 genre table, including the Winamp extensions.
const GENRE_TABLE: [&str; 193] = [
    "Blues",
    "Classic Rock",
    "Country",
    "Dance",
    "Disco",
    "Funk",
    "Grunge",
    "Hip-Hop",
    "Jazz",
    "Metal",
    "New Age",
    "Oldies",
    "Other",
    "Pop",
    "R&B",
    "Rap",
    "Reggae",
    "Rock",
    "Techno",
    "Industrial",
    "Alternative",
    "Ska",
    "Death Metal",
    "Pranks",
    "Soundtrack",
    "Euro-Techno",
    "Ambient",
    "Trip-Hop",
    "Vocal",
    "Jazz+Funk",
    "Fusion",
    "Trance",
    "Classical",
    "Instrumental",
    "Acid",
    "House",
    "Game",
    "Sound Clip",
    "Gospel",
    "Noise",
    "AlternRock",
    "Bass",
    "Soul",
    "Punk",
    "Space",
    "Meditative",
    "Instrumental Pop",
    "Instrumental Rock",
    "Ethnic",
    "Gothic",
    "Darkwave",
    "Techno-Industrial",
    "Electronic",
    "Pop-Folk",
    "Eurodance",
    "Dream",
    "Southern Rock",
    "Comedy",
    "Cult",
    "Gangsta",
    "Top 40",
    "Christian Rap",
    "Pop/Funk",
    "Jungle",
    "Native American",
    "Cabaret",
    "New Wave",
    "Psychadelic",
    "Rave",
    "Showtunes",
    "Trailer",
    "Lo-Fi",
    "Tribal",
    "Acid Punk",
    "Acid Jazz",
    "Polka",
    "Retro",
    "Musical",
    "Rock & Roll",
    "Hard Rock",
    "Folk",
    "Folk-Rock",
    "National Folk",
    "Swing",
    "Fast Fusion",
    "Bebob",
    "Latin",
    "Revival",
    "Celtic",
    "Bluegrass",
    "Avantgarde",
    "Gothic Rock",
    "Progressive Rock",
    "Psychedelic Rock",
    "Symphonic Rock",
    "Slow Rock",
    "Big Band",
    "Chorus",
    "Easy Listening",
    "Acoustic",
    "Humour",
    "Speech",
    "Chanson",
    "Opera",
    "Chamber Music",
    "Sonata",
    "Symphony",
    "Booty Bass",
    "Primus",
    "Porn Groove",
    "Satire",
    "Slow Jam",
    "Club",
    "Tango",
    "Samba",
    "Folklore",
    "Ballad",
    "Power Ballad",
    "Rhythmic Soul",
    "Freestyle",
    "Duet",
    "Punk Rock",
    "Drum Solo",
    "A capella",
    "Euro-House",
    "Dance Hall",
    "Goa",
    "Drum & Bass",
    "Club-House",
    "Hardcore",
    "Terror",
    "Indie",
    "Britpop",
    "Negerpunk",
    "Polsk Punk",
    "Beat",
    "Christian Gangsta",
    "Heavy Metal",
    "Black Metal",
    "Crossover",
    "Contemporary Christian",
    "Christian Rock",
    "Merengue",
    "Salsa",
    "Thrash Metal",
    "Anime",
    "JPop",
    "Synthpop",
    "Abstract",
    "Art Rock",
    "Baroque",
    "Bhangra",
    "Big Beat",
    "Breakbeat",
    "Chillout",
    "Downtempo",
    "Dub",
    "EBM",
    "Eclectic",
    "Electro",
    "Electroclash",
    "Emo",
    "Experimental",
    "Garage",
    "Global",
    "IDM",
    "Illbient",
    "Industro-Goth",
    "Jam Band",
    "Krautrock",
    "Leftfield",
    "Lounge",
    "Math Rock",
    "New Romantic",
    "Nu-Breakz",
    "Post-Punk",
    "Post-Rock",
    "Psytrance",
    "Shoegaze",
    "Space Rock",
    "Trop Rock",
    "World Music",
    "Neoclassical",
    "Audiobook",
    "Audio Theatre",
    "Neue Deutsche Welle",
    "Podcast",
    "Indie Rock",
    "G-Funk",
    "Dubstep",
    "Garage Rock",
    "Psybient",
    "Future Garage",
];
