// ============================================================================
// Scene labels and the prompt phrasings used to edit each of them
// ============================================================================

use rand::Rng;
use rand::seq::SliceRandom;
use std::fmt;
use std::str::FromStr;

/// Negative prompt sent with every inpainting call.
pub const NEGATIVE_PROMPT: &str =
    "extra objects, distorted shapes, new patterns, unrealistic textures, overpainting";

/// Semantic category ids as they appear in the label masks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Label {
    Car = 1,
    Sky = 2,
    Tree = 3,
    Building = 4,
    Signs = 5,
    Road = 6,
    Footpath = 7,
    ElectricLight = 8,
}

impl Label {
    pub const ALL: [Label; 8] = [
        Label::Car,
        Label::Sky,
        Label::Tree,
        Label::Building,
        Label::Signs,
        Label::Road,
        Label::Footpath,
        Label::ElectricLight,
    ];

    /// Labels that have a prompt template, in id order. Signs and electric
    /// lights are never edited.
    pub const ACTIVE: [Label; 6] = [
        Label::Car,
        Label::Sky,
        Label::Tree,
        Label::Building,
        Label::Road,
        Label::Footpath,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Label> {
        Label::ALL.iter().copied().find(|l| l.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Label::Car => "car",
            Label::Sky => "sky",
            Label::Tree => "tree",
            Label::Building => "building",
            Label::Signs => "signs",
            Label::Road => "road",
            Label::Footpath => "footpath",
            Label::ElectricLight => "electric light",
        }
    }

    pub fn template(self) -> Option<&'static PromptTemplate> {
        match self {
            Label::Car => Some(&CAR),
            Label::Sky => Some(&SKY),
            Label::Tree => Some(&TREE),
            Label::Building => Some(&BUILDING),
            Label::Road => Some(&ROAD),
            Label::Footpath => Some(&FOOTPATH),
            Label::Signs | Label::ElectricLight => None,
        }
    }

    pub fn is_active(self) -> bool {
        self.template().is_some()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Label {
    type Err = PromptError;

    /// Accepts a numeric id or a name; case, spaces, `_` and `-` are ignored
    /// so `electric_light`, `Electric Light` and `8` all parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = trimmed.parse::<u8>() {
            return Label::from_id(id).ok_or_else(|| PromptError::UnknownLabel(s.to_string()));
        }
        let key: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        Label::ALL
            .iter()
            .copied()
            .find(|l| l.name().replace(' ', "") == key)
            .ok_or_else(|| PromptError::UnknownLabel(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("label '{0}' has no prompt template and cannot be edited")]
    NoTemplate(Label),
    #[error("unknown label '{0}'")]
    UnknownLabel(String),
}

/// How one label's prompt is phrased.
#[derive(Debug)]
pub enum PromptTemplate {
    /// Always the same text.
    Fixed(&'static str),
    /// `{prefix}{one of choices}{suffix}`, choice picked uniformly.
    Choice {
        prefix: &'static str,
        choices: &'static [&'static str],
        suffix: &'static str,
    },
}

impl PromptTemplate {
    pub fn render<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        match self {
            PromptTemplate::Fixed(text) => (*text).to_string(),
            PromptTemplate::Choice {
                prefix,
                choices,
                suffix,
            } => {
                let pick = choices.choose(rng).copied().unwrap_or_default();
                format!("{}{}{}", prefix, pick, suffix)
            }
        }
    }

    /// Every string [`render`](Self::render) can return.
    pub fn variants(&self) -> Vec<String> {
        match self {
            PromptTemplate::Fixed(text) => vec![(*text).to_string()],
            PromptTemplate::Choice {
                prefix,
                choices,
                suffix,
            } => choices
                .iter()
                .map(|c| format!("{}{}{}", prefix, c, suffix))
                .collect(),
        }
    }
}

static CAR: PromptTemplate = PromptTemplate::Choice {
    prefix: "the car should be ",
    choices: &["blue", "gray", "white"],
    suffix: ", only recolor, keep same shape",
};

static SKY: PromptTemplate = PromptTemplate::Choice {
    prefix: "the sky should be ",
    choices: &["pale blue", "soft gray", "light pink"],
    suffix: ", subtle hue shift",
};

static TREE: PromptTemplate = PromptTemplate::Choice {
    prefix: "the tree foliage should be ",
    choices: &["green", "yellow"],
    suffix: ", only color change",
};

static BUILDING: PromptTemplate = PromptTemplate::Choice {
    prefix: "the building should be ",
    choices: &["light gray", "reddish brown"],
    suffix: ", only wall color change",
};

static ROAD: PromptTemplate = PromptTemplate::Fixed("the road should be with proper lanes");

static FOOTPATH: PromptTemplate = PromptTemplate::Choice {
    prefix: "the footpath should be ",
    choices: &["light beige", "soft gray"],
    suffix: ", only recolor",
};

/// Draw one prompt for `label`. Repeated calls may phrase it differently.
pub fn generate_prompt<R: Rng + ?Sized>(label: Label, rng: &mut R) -> Result<String, PromptError> {
    label
        .template()
        .map(|t| t.render(rng))
        .ok_or(PromptError::NoTemplate(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    #[test]
    fn catalog_has_eight_names() {
        let names: Vec<&str> = Label::ALL.iter().map(|l| l.name()).collect();
        assert_eq!(
            names,
            vec!["car", "sky", "tree", "building", "signs", "road", "footpath", "electric light"]
        );
        for (i, label) in Label::ALL.iter().enumerate() {
            assert_eq!(label.id() as usize, i + 1);
            assert_eq!(Label::from_id(label.id()), Some(*label));
        }
        assert_eq!(Label::from_id(0), None);
        assert_eq!(Label::from_id(9), None);
    }

    #[test]
    fn active_labels_are_exactly_those_with_templates() {
        let active: Vec<Label> = Label::ALL.iter().copied().filter(|l| l.is_active()).collect();
        assert_eq!(active, Label::ACTIVE.to_vec());
        assert!(!Label::Signs.is_active());
        assert!(!Label::ElectricLight.is_active());
    }

    #[test]
    fn prompts_come_from_the_label_variants() {
        let mut rng = StdRng::seed_from_u64(7);
        for label in Label::ACTIVE {
            let variants = label.template().unwrap().variants();
            assert!((1..=3).contains(&variants.len()));
            for _ in 0..20 {
                let prompt = generate_prompt(label, &mut rng).unwrap();
                assert!(variants.contains(&prompt), "{prompt:?} not in {variants:?}");
            }
        }
    }

    #[test]
    fn car_prompt_text() {
        let variants = Label::Car.template().unwrap().variants();
        assert_eq!(
            variants[0],
            "the car should be blue, only recolor, keep same shape"
        );
        assert_eq!(
            generate_prompt(Label::Road, &mut StdRng::seed_from_u64(0)).unwrap(),
            "the road should be with proper lanes"
        );
    }

    #[test]
    fn repeated_calls_cover_several_phrasings() {
        let mut rng = StdRng::seed_from_u64(1);
        let seen: HashSet<String> = (0..200)
            .map(|_| generate_prompt(Label::Sky, &mut rng).unwrap())
            .collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn inactive_labels_have_no_prompt() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            generate_prompt(Label::Signs, &mut rng),
            Err(PromptError::NoTemplate(Label::Signs))
        );
        assert_eq!(
            generate_prompt(Label::ElectricLight, &mut rng),
            Err(PromptError::NoTemplate(Label::ElectricLight))
        );
    }

    #[test]
    fn labels_parse_by_name_or_id() {
        assert_eq!("car".parse::<Label>(), Ok(Label::Car));
        assert_eq!(" Footpath ".parse::<Label>(), Ok(Label::Footpath));
        assert_eq!("electric_light".parse::<Label>(), Ok(Label::ElectricLight));
        assert_eq!("Electric Light".parse::<Label>(), Ok(Label::ElectricLight));
        assert_eq!("4".parse::<Label>(), Ok(Label::Building));
        assert!(matches!("9".parse::<Label>(), Err(PromptError::UnknownLabel(_))));
        assert!(matches!("boat".parse::<Label>(), Err(PromptError::UnknownLabel(_))));
    }
}
