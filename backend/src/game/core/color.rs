use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A round or target color. Compared by name, never by display value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Blue,
    Green,
    Yellow,
    Orange,
    /// Neutral color shown while a round is waiting to go live
    Gray,
}

pub const PALETTE: [Color; 5] = [
    Color::Red,
    Color::Blue,
    Color::Green,
    Color::Yellow,
    Color::Orange,
];

impl Color {
    pub fn name(self) -> &'static str {
        match self {
            Color::Red => "RED",
            Color::Blue => "BLUE",
            Color::Green => "GREEN",
            Color::Yellow => "YELLOW",
            Color::Orange => "ORANGE",
            Color::Gray => "GRAY",
        }
    }

    /// Unknown names fall back to the neutral color.
    pub fn from_name(name: &str) -> Self {
        PALETTE
            .into_iter()
            .find(|c| c.name() == name)
            .unwrap_or(Color::Gray)
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        PALETTE[rng.random_range(0..PALETTE.len())]
    }

    /// Uniform over the palette minus `excluded`.
    pub fn random_except<R: Rng + ?Sized>(rng: &mut R, excluded: Color) -> Self {
        loop {
            let color = Self::random(rng);
            if color != excluded {
                return color;
            }
        }
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Color::from_name(&name))
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
