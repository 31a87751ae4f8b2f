// Copyright 2025 DataStax Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except
// in compliance with the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License
// is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express
// or implied. See the License for the specific language governing permissions and limitations under
// the License.

use std::str::FromStr;

use crate::error::CoreError;

/// Separator between the class and the id in a canonical job name.
pub const NAME_SEPARATOR: char = '|';

/// Canonical job name: `"<klass>|<id>"`.
///
/// The klass is the registered symbolic job class; the id is the job's UUID
/// within its workflow. Edges (`incoming`/`outgoing`) reference sibling jobs
/// by this name, and it is the unit the successor-lock is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobName {
    klass: String,
    id: String,
}

impl JobName {
    pub fn new(klass: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            klass: klass.into(),
            id: id.into(),
        }
    }

    pub fn klass(&self) -> &str {
        &self.klass
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for JobName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.klass, NAME_SEPARATOR, self.id)
    }
}

impl FromStr for JobName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(NAME_SEPARATOR) {
            Some((klass, id)) if !klass.is_empty() && !id.is_empty() => {
                Ok(Self::new(klass, id))
            }
            _ => Err(CoreError::MalformedJobName {
                name: s.to_string(),
            }),
        }
    }
}

impl serde::Serialize for JobName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for JobName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A lookup pattern for jobs within a workflow.
///
/// `"<klass>"` selects the first job of that class; `"<klass>|<id>"` selects
/// exactly one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSelector {
    Klass(String),
    Exact(JobName),
}

impl JobSelector {
    /// Parse a selector string. A string containing the separator is an
    /// exact name; anything else selects by class. A malformed exact name
    /// (empty klass or id) selects nothing, so it is normalized to a klass
    /// selector that cannot match.
    pub fn parse(raw: &str) -> Self {
        if raw.contains(NAME_SEPARATOR) {
            match raw.parse() {
                Ok(name) => JobSelector::Exact(name),
                Err(_) => JobSelector::Klass(raw.to_string()),
            }
        } else {
            JobSelector::Klass(raw.to_string())
        }
    }

    /// The job class this selector constrains.
    pub fn klass(&self) -> &str {
        match self {
            JobSelector::Klass(klass) => klass,
            JobSelector::Exact(name) => name.klass(),
        }
    }

    pub fn matches(&self, name: &JobName) -> bool {
        match self {
            JobSelector::Klass(klass) => name.klass() == klass,
            JobSelector::Exact(exact) => name == exact,
        }
    }
}

impl From<JobName> for JobSelector {
    fn from(name: JobName) -> Self {
        JobSelector::Exact(name)
    }
}
