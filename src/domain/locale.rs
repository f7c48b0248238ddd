use crate::domain::{User, USER_PROPERTY_DEFAULT_LOCALE, USER_PROPERTY_PROFICIENT_LOCALES};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
};
use thiserror::Error;

/// Value submitted for an unchecked locale checkbox.
const UNCHECKED: &str = "false";

/// A language with an optional country, written `ll` or `ll_CC`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locale {
    language: String,
    country: Option<String>,
}

impl Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.country {
            Some(country) => write!(f, "{}_{country}", self.language),
            None => write!(f, "{}", self.language),
        }
    }
}

impl FromStr for Locale {
    type Err = ParseLocaleError;

    /// Parse `ll`, `ll_CC` or `ll-CC`, normalizing the case of both parts.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseLocaleError(s.to_string());

        let mut parts = s.trim().split(['_', '-']);
        let language = parts
            .next()
            .filter(|language| is_alpha(language, 2..=3))
            .ok_or_else(invalid)?
            .to_ascii_lowercase();
        let country = parts
            .next()
            .map(|country| {
                is_alpha(country, 2..=2)
                    .then(|| country.to_ascii_uppercase())
                    .ok_or_else(invalid)
            })
            .transpose()?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self { language, country })
    }
}

fn is_alpha(s: &str, len: std::ops::RangeInclusive<usize>) -> bool {
    len.contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphabetic())
}

#[derive(Debug, Error)]
#[error("invalid locale {0:?}")]
pub struct ParseLocaleError(String);

/// A locale the user interface can be presented in.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PresentationLocale {
    #[serde_as(as = "DisplayFromStr")]
    pub locale: Locale,
    pub display_name: String,
}

/// A locale offered for selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleOption {
    pub locale: Locale,
    pub name: String,
    pub display_name: String,
    pub selected: bool,
}

/// View model of a user's locale preferences: a default locale and the proficient locales
/// selected among the presentation locales. Options are kept in locale name order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserDefaults {
    default_locale: Option<String>,
    options: Vec<LocaleOption>,
}

impl UserDefaults {
    /// Options built from the given presentation locales with the comma-joined proficient
    /// locales selected.
    pub fn new<I>(display_locales: I, proficient_locales: Option<&str>) -> Self
    where
        I: IntoIterator<Item = PresentationLocale>,
    {
        let mut user_defaults = Self::default();
        user_defaults.set_display_locales(display_locales);
        if let Some(proficient_locales) = proficient_locales {
            user_defaults.set_proficient_locales(proficient_locales);
        }
        user_defaults
    }

    /// Read the preferences stored in the properties of the given user.
    pub fn from_user<I>(user: &User, display_locales: I) -> Self
    where
        I: IntoIterator<Item = PresentationLocale>,
    {
        let mut user_defaults = Self::new(
            display_locales,
            user.properties
                .get(USER_PROPERTY_PROFICIENT_LOCALES)
                .map(String::as_str),
        );
        user_defaults.default_locale = user.properties.get(USER_PROPERTY_DEFAULT_LOCALE).cloned();
        user_defaults
    }

    /// Store the preferences in the properties of the given user.
    pub fn apply_to(&self, user: &mut User) {
        match &self.default_locale {
            Some(default_locale) => {
                user.properties.insert(
                    USER_PROPERTY_DEFAULT_LOCALE.to_string(),
                    default_locale.clone(),
                );
            }
            None => {
                user.properties.remove(USER_PROPERTY_DEFAULT_LOCALE);
            }
        }
        user.properties.insert(
            USER_PROPERTY_PROFICIENT_LOCALES.to_string(),
            self.proficient_locales(),
        );
    }

    pub fn default_locale(&self) -> Option<&str> {
        self.default_locale.as_deref()
    }

    pub fn set_default_locale(&mut self, default_locale: Option<String>) {
        self.default_locale = default_locale;
    }

    pub fn options(&self) -> &[LocaleOption] {
        &self.options
    }

    /// Replace the offered locales, keeping the current selection where names still match.
    pub fn set_display_locales<I>(&mut self, display_locales: I)
    where
        I: IntoIterator<Item = PresentationLocale>,
    {
        let selected = self.proficient_locales();

        self.options = display_locales
            .into_iter()
            .map(|PresentationLocale { locale, display_name }| {
                let name = locale.to_string();
                let option = LocaleOption {
                    locale,
                    name: name.clone(),
                    display_name,
                    selected: false,
                };
                (name, option)
            })
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect();

        self.set_proficient_locales(&selected);
    }

    /// Comma-joined names of the selected options.
    pub fn proficient_locales(&self) -> String {
        self.options
            .iter()
            .filter(|option| option.selected)
            .map(|option| option.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Select exactly the options named in the given comma-joined list; unknown names are
    /// ignored.
    pub fn set_proficient_locales(&mut self, proficient_locales: &str) {
        self.select(proficient_locales.split(','));
    }

    /// Select exactly the options named in the given list as submitted by a form.
    pub fn set_proficient_locales_list<S>(&mut self, proficient_locales: &[S])
    where
        S: AsRef<str>,
    {
        self.select(
            proficient_locales
                .iter()
                .map(|name| name.as_ref())
                .filter(|name| *name != UNCHECKED),
        );
    }

    fn select<'a>(&mut self, names: impl Iterator<Item = &'a str>) {
        self.options
            .iter_mut()
            .for_each(|option| option.selected = false);
        for name in names.map(str::trim) {
            if let Some(option) = self.options.iter_mut().find(|option| option.name == name) {
                option.selected = true;
            }
        }
    }
}
