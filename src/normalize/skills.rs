// src/normalize/skills.rs
use regex::Regex;
use std::collections::BTreeSet;

pub const DEFAULT_SKILLS: &[&str] = &[
    "rust", "python", "java", "javascript", "typescript", "golang", "c++", "c#", "kotlin", "swift",
    "ruby", "php", "scala", "sql", "postgresql", "mysql", "mongodb", "redis", "kafka", "graphql",
    "react", "angular", "vue", "node.js", "django", "spring", "docker", "kubernetes", "terraform",
    "aws", "azure", "gcp", "linux", "git", "machine learning", "data science", "pytorch",
    "tensorflow", "spark", "airflow", "devops", "microservices",
];

/// Whole-word, case-insensitive skill vocabulary matcher.
#[derive(Debug, Clone)]
pub struct SkillMatcher {
    entries: Vec<(String, Regex)>,
}

impl Default for SkillMatcher {
    fn default() -> Self {
        let vocab: Vec<String> = DEFAULT_SKILLS.iter().map(|s| s.to_string()).collect();
        Self::new(&vocab)
    }
}

impl SkillMatcher {
    pub fn new(vocabulary: &[String]) -> Self {
        let mut entries: Vec<(String, Regex)> = Vec::with_capacity(vocabulary.len());
        for skill in vocabulary {
            let skill = skill.trim().to_lowercase();
            if skill.is_empty() || entries.iter().any(|(s, _)| *s == skill) {
                continue;
            }
            // `+` and `#` extend a token ("c++", "c#"); a trailing `.` is sentence punctuation.
            let pattern = format!(r"(?i)(?:^|[^\w+#.]){}(?:$|[^\w+#])", regex::escape(&skill));
            match Regex::new(&pattern) {
                Ok(re) => entries.push((skill, re)),
                Err(e) => tracing::warn!(skill = %skill, error = %e, "skipping unusable skill pattern"),
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extract(&self, text: &str) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(s, _)| s.clone())
            .collect()
    }
}
