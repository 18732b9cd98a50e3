//! Synthetic context pickers
//!
//! Compliance reports need plausible role and recipe context even though
//! the simulated nodes never execute anything. These pickers hand out one
//! of a few canned sets per run.

use rand::seq::SliceRandom;
use rand::Rng;

const ROLE_SETS: &[&[&str]] = &[
    &["base_deb", "apache_deb", "debian-hardening-prod", "dot.role"],
    &["base_linux", "apache_linux", "linux-hardening-prod", "dot.role"],
    &["base_windows", "windows-hardening", "best.role.ever"],
];

const RECIPE_SETS: &[&[&str]] = &[
    &["apache_extras", "apache_extras::harden", "java::default", "nagios::fix"],
    &["java", "java::test", "java::security", "nagios::fix"],
    &["linux::harden", "tomcat", "tomcat::setup", "tomcat::configure", "nagios::fix"],
    &["apache::default", "tomcat", "tomcat::setup", "tomcat::configure", "nagios"],
];

fn pick<R: Rng>(sets: &[&[&str]], rng: &mut R) -> Vec<String> {
    sets.choose(rng)
        .map(|set| set.iter().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

/// One canned set of role names.
pub fn role_set<R: Rng>(rng: &mut R) -> Vec<String> {
    pick(ROLE_SETS, rng)
}

/// One canned set of recipe names.
pub fn recipe_set<R: Rng>(rng: &mut R) -> Vec<String> {
    pick(RECIPE_SETS, rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picked_sets_are_never_empty() {
        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            assert!(!role_set(&mut rng).is_empty());
            assert!(!recipe_set(&mut rng).is_empty());
        }
    }
}
