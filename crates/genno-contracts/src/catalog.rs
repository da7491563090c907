use indexmap::IndexMap;

pub const DEFAULT_THEME_ID: &str = "birthday-party";
pub const DEFAULT_STYLE_ID: &str = "comic-superhero";
pub const HOLIDAY_THEME_ID: &str = "holiday";
/// Sentinel theme whose name comes from the user's custom text.
pub const CUSTOM_THEME_ID: &str = "custom";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeSpec {
    pub id: String,
    pub name: String,
}

impl ThemeSpec {
    pub fn is_custom(&self) -> bool {
        self.id == CUSTOM_THEME_ID
    }

    pub fn is_holiday(&self) -> bool {
        self.id == HOLIDAY_THEME_ID
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSpec {
    pub id: String,
    pub label: String,
    pub description: String,
}

/// Themed-set themes, imaginative art styles and holiday locations, in the
/// order they are offered to the user.
#[derive(Debug, Clone)]
pub struct ThemeCatalog {
    themes: IndexMap<String, ThemeSpec>,
    styles: IndexMap<String, StyleSpec>,
    holiday_locations: Vec<String>,
}

impl Default for ThemeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ThemeCatalog {
    pub fn new() -> Self {
        Self {
            themes: default_themes(),
            styles: default_styles(),
            holiday_locations: HOLIDAY_LOCATIONS.iter().map(|row| row.to_string()).collect(),
        }
    }

    pub fn theme(&self, id: &str) -> Option<&ThemeSpec> {
        self.themes.get(id)
    }

    pub fn themes(&self) -> impl Iterator<Item = &ThemeSpec> {
        self.themes.values()
    }

    pub fn style(&self, id: &str) -> Option<&StyleSpec> {
        self.styles.get(id)
    }

    pub fn styles(&self) -> impl Iterator<Item = &StyleSpec> {
        self.styles.values()
    }

    pub fn holiday_locations(&self) -> &[String] {
        self.holiday_locations.as_slice()
    }

    /// Accepts either an id or a display name, case-insensitively.
    pub fn find_theme(&self, query: &str) -> Option<&ThemeSpec> {
        let needle = query.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.themes.values().find(|theme| {
            theme.id == needle || theme.name.to_ascii_lowercase() == needle
        })
    }

    pub fn find_style(&self, query: &str) -> Option<&StyleSpec> {
        let needle = query.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.styles.values().find(|style| {
            style.id == needle || style.label.to_ascii_lowercase() == needle
        })
    }
}

const HOLIDAY_LOCATIONS: &[&str] = &[
    "a sunny tropical beach with white sand and turquoise water",
    "snowy mountains with a cozy wooden cabin and pine trees",
    "a charming European countryside village with cobblestone streets and historic buildings",
    "an exciting safari on the African savanna with wildlife in the distance",
    "a bustling metropolis like Tokyo or Paris with iconic landmarks",
    "a luxury cruise ship on the Mediterranean Sea at sunset",
    "camping under the stars in a national park beside a warm campfire",
    "exploring ancient temple ruins deep in a Southeast Asian jungle",
    "a festive Christmas market in an old German town with twinkling lights",
    "a lively summer music festival with a huge stage and an excited crowd",
];

fn default_themes() -> IndexMap<String, ThemeSpec> {
    let mut map = IndexMap::new();
    let mut insert = |id: &str, name: &str| {
        map.insert(
            id.to_string(),
            ThemeSpec {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    };

    insert(DEFAULT_THEME_ID, "Birthday Party");
    insert("christmas", "Christmas");
    insert("halloween", "Halloween Costumes");
    insert("elegant", "Elegant");
    insert("royal", "Royal Costumes");
    insert(HOLIDAY_THEME_ID, "Holiday");
    insert(CUSTOM_THEME_ID, "Create Your Own...");
    map
}

fn default_styles() -> IndexMap<String, StyleSpec> {
    let mut map = IndexMap::new();
    let mut insert = |id: &str, label: &str, description: &str| {
        map.insert(
            id.to_string(),
            StyleSpec {
                id: id.to_string(),
                label: label.to_string(),
                description: description.to_string(),
            },
        );
    };

    insert(
        DEFAULT_STYLE_ID,
        "Comic Superhero",
        "superhero comic book style",
    );
    insert("classic-cartoon", "Classic Cartoon", "classic cartoon style");
    insert(
        "modern-3d",
        "Modern 3D Animation",
        "modern 3D animation style, like a Pixar film",
    );
    insert("lego", "LEGO Brick World", "a world built out of LEGO bricks");
    insert(
        "claymation",
        "Claymation Figures",
        "charming claymation figures in a handmade world",
    );
    insert(
        "pixel-art",
        "8-Bit Pixel Art",
        "8-bit pixel art style from retro video games",
    );
    insert("anime", "Japanese Anime", "vibrant Japanese anime style");
    insert(
        "watercolor",
        "Watercolor Painting",
        "a soft and expressive watercolor painting",
    );
    insert(
        "cyberpunk",
        "Neon Cyberpunk World",
        "a cyberpunk cityscape flooded with neon lights",
    );
    insert(
        "wool-felt",
        "Wool & Felt Craft",
        "cute fuzzy characters made of wool and felt",
    );
    map
}
