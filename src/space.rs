use crate::error::ConfigError;
use itertools::Itertools;
use std::collections::BTreeMap;

/// Named → option-sequence registry of flag families.
///
/// Each family is one axis of the configuration space; an empty string
/// option means "omit this family from the combination".
pub type FamilyRegistry = BTreeMap<String, Vec<String>>;

/// The expanded configuration space for one run.
#[derive(Debug, Clone)]
pub struct ConfigSpace {
  /// One combined argument string per cartesian-product tuple.
  pub base: Vec<String>,

  /// Every base combination with the ordering flag appended.
  pub augmented: Vec<String>,
}

/// Expands the selected families into the cartesian product of their option
/// strings, plus the augmented variant set.
///
/// Ordering is deterministic and significant: the product follows the
/// selection order outer-to-inner, then within-family sequence order.
/// Downstream repetition budgets are sized from this ordering.
///
/// Every requested name is validated against the registry first; unknown
/// names fail with [`ConfigError::UnknownFamilies`] listing all offenders.
pub fn build_option_sets(
  selected: &[String],
  registry: &FamilyRegistry,
  ordering_flag: &str,
) -> Result<ConfigSpace, ConfigError> {
  if selected.is_empty() {
    return Err(ConfigError::NoFamiliesSelected);
  }

  let unknown: Vec<String> = selected
    .iter()
    .filter(|name| !registry.contains_key(*name))
    .cloned()
    .collect();
  if !unknown.is_empty() {
    return Err(ConfigError::UnknownFamilies {
      keys: unknown,
      known: registry.keys().cloned().collect(),
    });
  }

  for name in selected {
    if registry[name].is_empty() {
      return Err(ConfigError::EmptyFamily(name.clone()));
    }
  }

  let base: Vec<String> = selected
    .iter()
    .map(|name| registry[name].iter())
    .multi_cartesian_product()
    .map(|parts| parts.iter().filter(|opt| !opt.is_empty()).join(" "))
    .collect();

  let augmented: Vec<String> = base
    .iter()
    .map(|combo| {
      if combo.is_empty() {
        ordering_flag.to_string()
      } else {
        format!("{combo} {ordering_flag}")
      }
    })
    .collect();

  Ok(ConfigSpace { base, augmented })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registry(families: &[(&str, &[&str])]) -> FamilyRegistry {
    families
      .iter()
      .map(|(name, opts)| {
        (
          name.to_string(),
          opts.iter().map(|o| o.to_string()).collect(),
        )
      })
      .collect()
  }

  fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn product_size_is_product_of_family_sizes() {
    let reg = registry(&[
      ("filter", &["a", "b", "c"][..]),
      ("time", &["x", "y"][..]),
      ("bcp", &["p", "q"][..]),
    ]);
    let space = build_option_sets(&names(&["filter", "time", "bcp"]), &reg, "--z").unwrap();
    assert_eq!(space.base.len(), 3 * 2 * 2);
    assert_eq!(space.augmented.len(), space.base.len());
  }

  #[test]
  fn two_family_scenario() {
    let reg = registry(&[("a", &["--x=1", "--x=2"][..]), ("b", &["--y=1"][..])]);
    let space = build_option_sets(&names(&["a", "b"]), &reg, "--z=true").unwrap();
    assert_eq!(space.base, vec!["--x=1 --y=1", "--x=2 --y=1"]);
    assert_eq!(
      space.augmented,
      vec!["--x=1 --y=1 --z=true", "--x=2 --y=1 --z=true"]
    );
  }

  #[test]
  fn selection_order_is_outer_to_inner() {
    let reg = registry(&[("outer", &["o1", "o2"][..]), ("inner", &["i1", "i2"][..])]);
    let space = build_option_sets(&names(&["outer", "inner"]), &reg, "--z").unwrap();
    assert_eq!(space.base, vec!["o1 i1", "o1 i2", "o2 i1", "o2 i2"]);
  }

  #[test]
  fn empty_option_omits_the_family() {
    let reg = registry(&[("order", &["--sort=true", ""][..])]);
    let space = build_option_sets(&names(&["order"]), &reg, "--z").unwrap();
    assert_eq!(space.base, vec!["--sort=true", ""]);
    // The augmented variant of an all-empty combination is just the flag.
    assert_eq!(space.augmented, vec!["--sort=true --z", "--z"]);
  }

  #[test]
  fn unknown_families_are_all_reported() {
    let reg = registry(&[("filter", &["a"][..])]);
    let err = build_option_sets(&names(&["filter", "nope", "bogus"]), &reg, "--z").unwrap_err();
    match err {
      ConfigError::UnknownFamilies { keys, known } => {
        assert_eq!(keys, vec!["nope", "bogus"]);
        assert_eq!(known, vec!["filter"]);
      }
      other => panic!("expected UnknownFamilies, got {other:?}"),
    }
  }

  #[test]
  fn empty_option_list_is_rejected() {
    let reg = registry(&[("hollow", &[][..])]);
    assert!(matches!(
      build_option_sets(&names(&["hollow"]), &reg, "--z"),
      Err(ConfigError::EmptyFamily(name)) if name == "hollow"
    ));
  }

  #[test]
  fn empty_selection_is_rejected() {
    let reg = registry(&[("filter", &["a"][..])]);
    assert!(matches!(
      build_option_sets(&[], &reg, "--z"),
      Err(ConfigError::NoFamiliesSelected)
    ));
  }
}
