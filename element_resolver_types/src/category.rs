//! Closed set of element categories and the class-name mapping table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Target automation platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// XCUITest class names.
    #[default]
    Ios,
    /// UiAutomator2 class names.
    Android,
}

/// Category of a UI element, derived from its platform class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCategory {
    /// Tappable button.
    Button,
    /// Editable text input.
    TextField,
    /// Password input.
    SecureTextField,
    /// Read-only label.
    StaticText,
    /// Image view.
    Image,
    /// Row of a list or table.
    Cell,
    /// Scrollable list or table container.
    List,
    /// Toggle.
    Switch,
    /// Slider / seek bar.
    Slider,
    /// Hyperlink.
    Link,
    /// Navigation / tool bar.
    NavigationBar,
    /// Anything not in the table.
    Other,
}

/// Class name → category. First match wins for `class_name`, so the
/// canonical entry of each category comes first per platform.
const CLASS_TABLE: &[(&str, Platform, ElementCategory)] = &[
    ("XCUIElementTypeButton", Platform::Ios, ElementCategory::Button),
    ("XCUIElementTypeTextField", Platform::Ios, ElementCategory::TextField),
    ("XCUIElementTypeTextView", Platform::Ios, ElementCategory::TextField),
    ("XCUIElementTypeSearchField", Platform::Ios, ElementCategory::TextField),
    ("XCUIElementTypeSecureTextField", Platform::Ios, ElementCategory::SecureTextField),
    ("XCUIElementTypeStaticText", Platform::Ios, ElementCategory::StaticText),
    ("XCUIElementTypeImage", Platform::Ios, ElementCategory::Image),
    ("XCUIElementTypeCell", Platform::Ios, ElementCategory::Cell),
    ("XCUIElementTypeTable", Platform::Ios, ElementCategory::List),
    ("XCUIElementTypeCollectionView", Platform::Ios, ElementCategory::List),
    ("XCUIElementTypeSwitch", Platform::Ios, ElementCategory::Switch),
    ("XCUIElementTypeSlider", Platform::Ios, ElementCategory::Slider),
    ("XCUIElementTypeLink", Platform::Ios, ElementCategory::Link),
    ("XCUIElementTypeNavigationBar", Platform::Ios, ElementCategory::NavigationBar),
    ("XCUIElementTypeToolbar", Platform::Ios, ElementCategory::NavigationBar),
    ("android.widget.Button", Platform::Android, ElementCategory::Button),
    ("android.widget.ImageButton", Platform::Android, ElementCategory::Button),
    ("android.widget.EditText", Platform::Android, ElementCategory::TextField),
    ("android.widget.AutoCompleteTextView", Platform::Android, ElementCategory::TextField),
    ("android.widget.TextView", Platform::Android, ElementCategory::StaticText),
    ("android.widget.ImageView", Platform::Android, ElementCategory::Image),
    ("android.widget.LinearLayout", Platform::Android, ElementCategory::Cell),
    ("android.widget.ListView", Platform::Android, ElementCategory::List),
    ("androidx.recyclerview.widget.RecyclerView", Platform::Android, ElementCategory::List),
    ("android.widget.Switch", Platform::Android, ElementCategory::Switch),
    ("android.widget.CheckBox", Platform::Android, ElementCategory::Switch),
    ("android.widget.SeekBar", Platform::Android, ElementCategory::Slider),
    ("android.widget.Toolbar", Platform::Android, ElementCategory::NavigationBar),
];

impl ElementCategory {
    /// Map a platform class name onto a category. Unknown names are `Other`.
    pub fn from_class_name(class_name: &str) -> Self {
        let class_name = class_name.trim();
        CLASS_TABLE
            .iter()
            .find(|(name, _, _)| *name == class_name)
            .map(|(_, _, category)| *category)
            .unwrap_or(Self::Other)
    }

    /// Canonical class name of this category on `platform`, if any.
    pub fn class_name(&self, platform: Platform) -> Option<&'static str> {
        CLASS_TABLE
            .iter()
            .find(|(_, p, category)| *p == platform && category == self)
            .map(|(name, _, _)| *name)
    }

    /// Stable snake_case tag, used in metadata and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::TextField => "text_field",
            Self::SecureTextField => "secure_text_field",
            Self::StaticText => "static_text",
            Self::Image => "image",
            Self::Cell => "cell",
            Self::List => "list",
            Self::Switch => "switch",
            Self::Slider => "slider",
            Self::Link => "link",
            Self::NavigationBar => "navigation_bar",
            Self::Other => "other",
        }
    }

    /// Inverse of [`ElementCategory::as_str`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        [
            Self::Button,
            Self::TextField,
            Self::SecureTextField,
            Self::StaticText,
            Self::Image,
            Self::Cell,
            Self::List,
            Self::Switch,
            Self::Slider,
            Self::Link,
            Self::NavigationBar,
            Self::Other,
        ]
        .into_iter()
        .find(|category| category.as_str() == tag)
    }
}

impl fmt::Display for ElementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
