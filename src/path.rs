use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

/// Path of an img or sound inside an NPK, e.g. `Interface/Emoticon/Against.img`.
///
/// Paths are case-insensitive and accept `/` or `\` as separators. Runs of
/// separators collapse and leading/trailing separators are dropped, so the
/// stored form is always `a/b/c`. The root path has no components.
#[derive(Clone, Default)]
pub struct NpkPath {
    normalized: String,
}

impl NpkPath {
    pub fn new(raw: &str) -> Self {
        let mut normalized = String::with_capacity(raw.len());
        let mut last_was_separator = true;
        for c in raw.chars() {
            if c == '/' || c == '\\' {
                if !last_was_separator {
                    normalized.push('/');
                }
                last_was_separator = true;
            } else {
                normalized.push(c);
                last_was_separator = false;
            }
        }
        if normalized.ends_with('/') {
            normalized.pop();
        }
        Self { normalized }
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn is_root(&self) -> bool {
        self.normalized.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.normalized.split('/').filter(|c| !c.is_empty())
    }

    /// The parent of a single-component path (and of the root) is the root.
    pub fn containing_directory(&self) -> NpkPath {
        match self.normalized.rfind('/') {
            Some(i) => Self {
                normalized: self.normalized[..i].to_string(),
            },
            None => Self::root(),
        }
    }

    /// Last component, or the empty string for the root.
    pub fn file_name(&self) -> &str {
        match self.normalized.rfind('/') {
            Some(i) => &self.normalized[i + 1..],
            None => &self.normalized,
        }
    }

    pub fn combine(&self, other: &NpkPath) -> NpkPath {
        if self.is_root() {
            return other.clone();
        }
        if other.is_root() {
            return self.clone();
        }
        Self {
            normalized: format!("{}/{}", self.normalized, other.normalized),
        }
    }

    /// Drops the first component, e.g. the `sprite/` classification prefix.
    pub fn strip_prefix(&self) -> NpkPath {
        match self.normalized.find('/') {
            Some(i) => Self {
                normalized: self.normalized[i + 1..].to_string(),
            },
            None => Self::root(),
        }
    }

    pub fn first_component(&self) -> Option<&str> {
        self.components().next()
    }

    /// Name of the .npk an img with this path ships in:
    /// `Interface/Emoticon/Against.img` -> `sprite_Interface_Emoticon.npk`.
    pub fn image_npk_name(&self) -> String {
        self.npk_name("sprite")
    }

    /// `equip/armor/cloth_touch.wav` -> `sounds_equip_armor.npk`.
    pub fn sound_npk_name(&self) -> String {
        self.npk_name("sounds")
    }

    fn npk_name(&self, prefix: &str) -> String {
        let path = match self.first_component() {
            Some(first) if first.eq_ignore_ascii_case(prefix) => self.strip_prefix(),
            _ => self.clone(),
        };
        let components: Vec<&str> = path.components().collect();
        let mut name = prefix.to_string();
        for dir in components.iter().take(components.len().saturating_sub(1)) {
            name.push('_');
            name.push_str(dir);
        }
        name.push_str(".npk");
        name
    }

    fn folded(&self) -> impl Iterator<Item = char> + '_ {
        self.normalized.chars().flat_map(char::to_lowercase)
    }
}

impl From<&str> for NpkPath {
    fn from(raw: &str) -> Self {
        NpkPath::new(raw)
    }
}

impl From<String> for NpkPath {
    fn from(raw: String) -> Self {
        NpkPath::new(&raw)
    }
}

impl PartialEq for NpkPath {
    fn eq(&self, other: &Self) -> bool {
        self.folded().eq(other.folded())
    }
}

impl Eq for NpkPath {}

impl PartialEq<str> for NpkPath {
    fn eq(&self, other: &str) -> bool {
        *self == NpkPath::new(other)
    }
}

impl PartialEq<&str> for NpkPath {
    fn eq(&self, other: &&str) -> bool {
        *self == NpkPath::new(other)
    }
}

impl Hash for NpkPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in self.folded() {
            state.write_u32(c as u32);
        }
        state.write_u8(0xff);
    }
}

impl Ord for NpkPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl PartialOrd for NpkPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NpkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl fmt::Debug for NpkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.normalized)
    }
}
