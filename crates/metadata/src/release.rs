/// Kind of release an album is, following MusicBrainz release group types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReleaseType {
    Album(Option<ReleaseRefinement>),
    Ep(Option<ReleaseRefinement>),
    Single(Option<ReleaseRefinement>),
    Compilation(Option<ReleaseRefinement>),
    Soundtrack,
    Mix,
    Mixtape,
    Demo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReleaseRefinement {
    Live,
    Remix,
}

impl Default for ReleaseType {
    fn default() -> Self {
        ReleaseType::Album(None)
    }
}

impl ReleaseType {
    /// Parses a primary type followed by secondary types, e.g. `["album", "compilation", "live"]`.
    ///
    /// Secondary types without a primary are treated as albums.
    pub fn parse<S: AsRef<str>>(types: &[S]) -> Option<Self> {
        let primary = types.first()?.as_ref();
        let release = if primary.eq_ignore_ascii_case("album") {
            parse_secondary(types, 1, ReleaseType::Album)
        } else if primary.eq_ignore_ascii_case("ep") {
            parse_secondary(types, 1, ReleaseType::Ep)
        } else if primary.eq_ignore_ascii_case("single") {
            parse_secondary(types, 1, ReleaseType::Single)
        } else {
            parse_secondary(types, 0, ReleaseType::Album)
        };
        Some(release)
    }

    pub fn refinement(&self) -> Option<ReleaseRefinement> {
        match self {
            ReleaseType::Album(refinement)
            | ReleaseType::Ep(refinement)
            | ReleaseType::Single(refinement)
            | ReleaseType::Compilation(refinement) => *refinement,
            _ => None,
        }
    }
}

fn parse_secondary<S: AsRef<str>>(
    types: &[S],
    index: usize,
    refine: fn(Option<ReleaseRefinement>) -> ReleaseType,
) -> ReleaseType {
    let secondary = types.get(index).map(AsRef::as_ref);
    match secondary {
        Some(value) if value.eq_ignore_ascii_case("compilation") => {
            leaf_type(types.get(index + 1).map(AsRef::as_ref), ReleaseType::Compilation)
        }
        _ => leaf_type(secondary, refine),
    }
}

fn leaf_type(
    value: Option<&str>,
    refine: fn(Option<ReleaseRefinement>) -> ReleaseType,
) -> ReleaseType {
    let Some(value) = value else {
        return refine(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "soundtrack" => ReleaseType::Soundtrack,
        "mixtape/street" => ReleaseType::Mixtape,
        "dj-mix" => ReleaseType::Mix,
        "demo" => ReleaseType::Demo,
        "live" => refine(Some(ReleaseRefinement::Live)),
        "remix" => refine(Some(ReleaseRefinement::Remix)),
        _ => refine(None),
    }
}
