use anyhow::{Result, anyhow, bail};
use battle_types::{Challenge, Difficulty};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

pub const MAX_CHALLENGE_POINTS: i32 = 1_000_000;

/// Read-only set of challenges a battle can be created with.
#[derive(Debug, Clone)]
pub struct ChallengeCatalog {
    challenges: Vec<Challenge>,
}

impl ChallengeCatalog {
    pub fn new(challenges: Vec<Challenge>) -> Result<Self> {
        if challenges.is_empty() {
            bail!("Challenge catalog is empty");
        }

        let mut ids = HashSet::new();
        for challenge in &challenges {
            if !ids.insert(challenge.id.as_str()) {
                bail!("Duplicate challenge id: {}", challenge.id);
            }
            if challenge.points <= 0 {
                bail!("Challenge {} must be worth at least one point", challenge.id);
            }
            if challenge.points > MAX_CHALLENGE_POINTS {
                bail!(
                    "Challenge {} is worth more than {} points",
                    challenge.id,
                    MAX_CHALLENGE_POINTS
                );
            }
            if challenge.expected_output.trim().is_empty() {
                bail!("Challenge {} has no expected output", challenge.id);
            }
        }

        Ok(Self { challenges })
    }

    /// Parse a JSON array of challenges
    pub fn from_json(json: &str) -> Result<Self> {
        let challenges: Vec<Challenge> = serde_json::from_str(json)?;
        Self::new(challenges)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read challenges from {}: {}", path.display(), e))?;
        let catalog = Self::from_json(&json)?;
        debug!("Read {} challenges from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// The starter set shipped with the server
    pub fn with_default_challenges() -> Self {
        Self {
            challenges: default_challenges(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.id == id)
    }

    /// Pick a challenge, optionally restricted to one difficulty.
    ///
    /// The returned value is an owned copy; later catalog changes never reach a
    /// battle that already holds it.
    pub fn pick_random(&self, difficulty: Option<Difficulty>) -> Result<Challenge> {
        let candidates: Vec<&Challenge> = self
            .challenges
            .iter()
            .filter(|c| difficulty.is_none_or(|d| c.difficulty == d))
            .collect();

        if candidates.is_empty() {
            return Err(anyhow!("No challenges available for {:?}", difficulty));
        }

        let index = (Uuid::new_v4().as_u128() % candidates.len() as u128) as usize;
        Ok(candidates[index].clone())
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Challenge> {
        self.challenges.iter()
    }
}

impl Default for ChallengeCatalog {
    fn default() -> Self {
        Self::with_default_challenges()
    }
}

fn challenge(
    id: &str,
    title: &str,
    description: &str,
    initial_code: &str,
    expected_output: &str,
    difficulty: Difficulty,
    points: i32,
) -> Challenge {
    Challenge {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        initial_code: initial_code.to_string(),
        expected_output: expected_output.to_string(),
        difficulty,
        points,
    }
}

fn default_challenges() -> Vec<Challenge> {
    vec![
        challenge(
            "welcome-heading",
            "Welcome Heading",
            "Create a top-level heading that says Welcome.",
            "<!-- your heading here -->",
            "<h1>Welcome</h1>",
            Difficulty::Easy,
            100,
        ),
        challenge(
            "greeting-paragraph",
            "Greeting Paragraph",
            "Write a paragraph containing the text Hello, World!",
            "",
            "<p>Hello, World!</p>",
            Difficulty::Easy,
            100,
        ),
        challenge(
            "shopping-list",
            "Shopping List",
            "Build an unordered list with the items Milk, Eggs and Bread, in that order.",
            "<ul>\n</ul>",
            "<ul><li>Milk</li><li>Eggs</li><li>Bread</li></ul>",
            Difficulty::Medium,
            200,
        ),
        challenge(
            "profile-link",
            "Profile Link",
            "Link the text My Profile to /profile.",
            "<a></a>",
            "<a href=\"/profile\">My Profile</a>",
            Difficulty::Medium,
            200,
        ),
        challenge(
            "signup-form",
            "Signup Form",
            "Create a form with an email input and a submit button labelled Join.",
            "<form>\n</form>",
            "<form><input type=\"email\"><button type=\"submit\">Join</button></form>",
            Difficulty::Hard,
            300,
        ),
    ]
}
