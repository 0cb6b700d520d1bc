use crate::error::{AgentError, AgentResult};

/// The value of a resource: a scalar quantity or a set of integer ranges.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Ranges(Vec<(u64, u64)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub value: Value,
}

/// A multiset of named resource quantities, e.g. `cpus:1;mem:1024`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resources {
    resources: Vec<Resource>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `name:value;name:value` text form. Range values are
    /// written as `[begin-end,begin-end]`.
    pub fn parse(s: &str) -> AgentResult<Self> {
        let mut resources = Self::new();
        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((name, value)) = part.split_once(':') else {
                return Err(AgentError::InvalidArgument(format!(
                    "invalid resource: {part}"
                )));
            };
            let value = if let Some(ranges) = value.strip_prefix('[') {
                let ranges = ranges.strip_suffix(']').ok_or_else(|| {
                    AgentError::InvalidArgument(format!("invalid resource ranges: {part}"))
                })?;
                Value::Ranges(parse_ranges(ranges)?)
            } else {
                Value::Scalar(value.parse::<f64>().map_err(|_| {
                    AgentError::InvalidArgument(format!("invalid resource scalar: {part}"))
                })?)
            };
            resources.push(Resource {
                name: name.trim().to_string(),
                value,
            });
        }
        Ok(resources)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn get_scalar(&self, name: &str) -> f64 {
        self.resources
            .iter()
            .find_map(|r| match (&r.value, r.name == name) {
                (Value::Scalar(v), true) => Some(*v),
                _ => None,
            })
            .unwrap_or(0.0)
    }

    pub fn push(&mut self, resource: Resource) {
        self.add_one(resource);
    }

    pub fn add(&mut self, other: &Resources) {
        for resource in &other.resources {
            self.add_one(resource.clone());
        }
    }

    pub fn subtract(&mut self, other: &Resources) {
        for resource in &other.resources {
            self.subtract_one(resource);
        }
        self.resources.retain(|r| match &r.value {
            Value::Scalar(v) => *v != 0.0,
            Value::Ranges(ranges) => !ranges.is_empty(),
        });
    }

    fn add_one(&mut self, resource: Resource) {
        for existing in self.resources.iter_mut() {
            if existing.name != resource.name {
                continue;
            }
            match (&mut existing.value, &resource.value) {
                (Value::Scalar(a), Value::Scalar(b)) => {
                    *a += b;
                    return;
                }
                (Value::Ranges(a), Value::Ranges(b)) => {
                    a.extend_from_slice(b);
                    *a = normalize_ranges(std::mem::take(a));
                    return;
                }
                _ => {}
            }
        }
        self.resources.push(resource);
    }

    fn subtract_one(&mut self, resource: &Resource) {
        for existing in self.resources.iter_mut() {
            if existing.name != resource.name {
                continue;
            }
            match (&mut existing.value, &resource.value) {
                (Value::Scalar(a), Value::Scalar(b)) => {
                    *a -= b;
                    return;
                }
                (Value::Ranges(a), Value::Ranges(b)) => {
                    *a = subtract_ranges(std::mem::take(a), b);
                    return;
                }
                _ => {}
            }
        }
    }
}

impl std::ops::AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, other: &Resources) {
        self.add(other);
    }
}

impl std::ops::SubAssign<&Resources> for Resources {
    fn sub_assign(&mut self, other: &Resources) {
        self.subtract(other);
    }
}

impl std::fmt::Display for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for resource in &self.resources {
            if !first {
                write!(f, ";")?;
            }
            first = false;
            match &resource.value {
                Value::Scalar(v) => write!(f, "{}:{}", resource.name, v)?,
                Value::Ranges(ranges) => {
                    write!(f, "{}:[", resource.name)?;
                    for (i, (begin, end)) in ranges.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{begin}-{end}")?;
                    }
                    write!(f, "]")?;
                }
            }
        }
        Ok(())
    }
}

fn parse_ranges(s: &str) -> AgentResult<Vec<(u64, u64)>> {
    let mut ranges = vec![];
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let bounds = part
            .split_once('-')
            .and_then(|(begin, end)| Some((begin.trim().parse().ok()?, end.trim().parse().ok()?)))
            .filter(|(begin, end)| begin <= end);
        let Some(bounds) = bounds else {
            return Err(AgentError::InvalidArgument(format!(
                "invalid resource range: {part}"
            )));
        };
        ranges.push(bounds);
    }
    Ok(normalize_ranges(ranges))
}

/// Sort ranges and merge overlapping or adjacent ones.
fn normalize_ranges(mut ranges: Vec<(u64, u64)>) -> Vec<(u64, u64)> {
    ranges.sort_unstable();
    let mut out: Vec<(u64, u64)> = vec![];
    for (begin, end) in ranges {
        match out.last_mut() {
            Some((_, last_end)) if begin <= last_end.saturating_add(1) => {
                *last_end = (*last_end).max(end);
            }
            _ => out.push((begin, end)),
        }
    }
    out
}

fn subtract_ranges(ranges: Vec<(u64, u64)>, remove: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut out = ranges;
    for &(begin, end) in remove {
        let mut next = vec![];
        for (b, e) in out {
            if e < begin || b > end {
                next.push((b, e));
                continue;
            }
            if b < begin {
                next.push((b, begin - 1));
            }
            if e > end {
                next.push((end + 1, e));
            }
        }
        out = next;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        let resources = Resources::parse("cpus:1;mem:1024").unwrap();
        assert_eq!(resources.get_scalar("cpus"), 1.0);
        assert_eq!(resources.get_scalar("mem"), 1024.0);
        assert_eq!(resources.get_scalar("disk"), 0.0);
        assert_eq!(resources.to_string(), "cpus:1;mem:1024");
    }

    #[test]
    fn test_parse_ranges() {
        let resources = Resources::parse("ports:[31000-31009,31020-31029]").unwrap();
        assert_eq!(resources.to_string(), "ports:[31000-31009,31020-31029]");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Resources::parse("cpus").is_err());
        assert!(Resources::parse("cpus:one").is_err());
        assert!(Resources::parse("ports:[9-1]").is_err());
        assert!(Resources::parse("ports:[31000-").is_err());
    }

    #[test]
    fn test_add_and_subtract_scalars() {
        let mut resources = Resources::parse("cpus:1;mem:256").unwrap();
        resources += &Resources::parse("cpus:1;mem:256").unwrap();
        assert_eq!(resources, Resources::parse("cpus:2;mem:512").unwrap());

        resources -= &Resources::parse("cpus:1;mem:256").unwrap();
        assert_eq!(resources, Resources::parse("cpus:1;mem:256").unwrap());

        resources -= &Resources::parse("cpus:1;mem:256").unwrap();
        assert!(resources.is_empty());
    }

    #[test]
    fn test_add_merges_adjacent_ranges() {
        let mut resources = Resources::parse("ports:[31000-31004]").unwrap();
        resources += &Resources::parse("ports:[31005-31009]").unwrap();
        assert_eq!(resources.to_string(), "ports:[31000-31009]");
    }

    #[test]
    fn test_subtract_splits_ranges() {
        let mut resources = Resources::parse("ports:[31000-31009]").unwrap();
        resources -= &Resources::parse("ports:[31003-31005]").unwrap();
        assert_eq!(resources.to_string(), "ports:[31000-31002,31006-31009]");
    }

    #[test]
    fn test_add_new_name() {
        let mut resources = Resources::parse("cpus:1").unwrap();
        resources += &Resources::parse("mem:128").unwrap();
        assert_eq!(resources.to_string(), "cpus:1;mem:128");
    }
}
