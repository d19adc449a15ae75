//! Table classification.
//!
//! Every table of a snapshot gets exactly one [`Category`], which decides both
//! the phase it is copied in and the row filter used to copy it:
//!
//! 1. a `customer_id` column makes it [`Category::DirectCustomer`]
//! 2. a `user_id` column makes it [`Category::DirectUser`]
//! 3. exactly one foreign key into a direct-customer table makes it
//!    [`Category::IndirectFk`]
//! 4. anything else is [`Category::Reference`]
//!
//! Tables with foreign keys into more than one direct-customer table, or into
//! one through several columns, are classified as reference tables and flagged.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::core::{ForeignKey, ForeignKeySource, JoinPath, SchemaSnapshot, TableDescriptor};

/// Column that ties a row to a customer.
pub const CUSTOMER_COLUMN: &str = "customer_id";

/// Column that ties a row to a user.
pub const USER_COLUMN: &str = "user_id";

/// Columns never treated as implicit foreign keys.
const IMPLICIT_FK_EXCLUDED: [&str; 5] = ["id", "created_by", "updated_by", "created_at", "updated_at"];

/// How a table relates to the customer id set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Category {
    DirectCustomer { column: String },
    DirectUser { column: String },
    IndirectFk { join: JoinPath },
    Reference,
}

impl Category {
    /// Short label for plan output.
    pub fn label(&self) -> &'static str {
        match self {
            Category::DirectCustomer { .. } => "direct-customer",
            Category::DirectUser { .. } => "direct-user",
            Category::IndirectFk { .. } => "indirect-fk",
            Category::Reference => "reference",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::DirectCustomer { column } | Category::DirectUser { column } => {
                write!(f, "{} ({})", self.label(), column)
            }
            Category::IndirectFk { join } => write!(f, "{} ({})", self.label(), join),
            Category::Reference => f.write_str(self.label()),
        }
    }
}

/// A table whose classification needs operator review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationFlag {
    pub table: String,
    /// Foreign keys into direct-customer tables, as `column -> table.column`.
    pub candidates: Vec<String>,
}

impl fmt::Display for ClassificationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: ambiguous customer relationship via {}; treated as reference",
            self.table,
            self.candidates.join(", ")
        )
    }
}

/// The category of one table and an optional review flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub category: Category,
    pub flag: Option<ClassificationFlag>,
}

/// Categories for every table of one database, in snapshot order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassificationMap {
    pub database: String,
    entries: Vec<(String, Category)>,
    flags: Vec<ClassificationFlag>,
}

impl ClassificationMap {
    /// Category of a table, ignoring ASCII case.
    pub fn get(&self, table: &str) -> Option<&Category> {
        self.entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, c)| c)
    }

    /// Tables and categories in snapshot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Category)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn flags(&self) -> &[ClassificationFlag] {
        &self.flags
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Classify every table of a snapshot.
pub fn classify_snapshot(snapshot: &SchemaSnapshot) -> ClassificationMap {
    let mut map = ClassificationMap {
        database: snapshot.database.clone(),
        ..Default::default()
    };

    for table in &snapshot.tables {
        let classified = classify(table, snapshot);
        debug!("{}: {}", table.full_name(), classified.category);
        map.entries.push((table.name.clone(), classified.category));
        map.flags.extend(classified.flag);
    }

    map
}

/// Classify one table against the snapshot it belongs to.
pub fn classify(table: &TableDescriptor, snapshot: &SchemaSnapshot) -> Classified {
    if let Some(col) = table.find_column(CUSTOMER_COLUMN) {
        return Classified {
            category: Category::DirectCustomer {
                column: col.name.clone(),
            },
            flag: None,
        };
    }

    if let Some(col) = table.find_column(USER_COLUMN) {
        return Classified {
            category: Category::DirectUser {
                column: col.name.clone(),
            },
            flag: None,
        };
    }

    let mut seen = HashSet::new();
    let paths: Vec<JoinPath> = table
        .foreign_keys
        .iter()
        .filter(|fk| {
            seen.insert((
                fk.column.to_ascii_lowercase(),
                fk.ref_table.to_ascii_lowercase(),
            ))
        })
        .filter_map(|fk| join_path(fk, snapshot))
        .collect();

    match paths.as_slice() {
        [] => Classified {
            category: Category::Reference,
            flag: None,
        },
        [join] => Classified {
            category: Category::IndirectFk { join: join.clone() },
            flag: None,
        },
        many => Classified {
            category: Category::Reference,
            flag: Some(ClassificationFlag {
                table: table.full_name(),
                candidates: many
                    .iter()
                    .map(|j| format!("{} -> {}.{}", j.local_column, j.parent_table, j.parent_column))
                    .collect(),
            }),
        },
    }
}

/// Join path for a foreign key whose parent is a direct-customer table.
fn join_path(fk: &ForeignKey, snapshot: &SchemaSnapshot) -> Option<JoinPath> {
    let parent = snapshot.table(&fk.ref_table)?;
    let filter_col = parent.find_column(CUSTOMER_COLUMN)?;
    Some(JoinPath {
        local_column: fk.column.clone(),
        parent_table: parent.name.clone(),
        parent_column: fk.ref_column.clone(),
        parent_filter_column: filter_col.name.clone(),
    })
}

/// Add inferred foreign keys for `<name>_id` / `<name>Id` columns.
///
/// A column is linked to the first existing table named `<name>`, `<name>s`
/// or `<name>` without a trailing `s` that has an `id` column. Columns that
/// already carry a declared foreign key are left alone. Returns the number of
/// keys added.
pub fn detect_implicit_foreign_keys(snapshot: &mut SchemaSnapshot) -> usize {
    let mut inferred: Vec<(usize, ForeignKey)> = Vec::new();

    for (idx, table) in snapshot.tables.iter().enumerate() {
        for column in &table.columns {
            let lower = column.name.to_ascii_lowercase();
            if IMPLICIT_FK_EXCLUDED.contains(&lower.as_str()) {
                continue;
            }
            if table
                .foreign_keys
                .iter()
                .any(|fk| fk.column.eq_ignore_ascii_case(&column.name))
            {
                continue;
            }
            let Some(base) = implicit_base_name(&lower) else {
                continue;
            };

            let parent = candidate_names(&base)
                .iter()
                .filter_map(|name| snapshot.table(name))
                .find(|t| !t.name.eq_ignore_ascii_case(&table.name) && t.find_column("id").is_some());

            if let Some(parent) = parent {
                let ref_column = parent
                    .find_column("id")
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| "id".to_string());
                debug!(
                    "Implicit foreign key {}.{} -> {}.{}",
                    table.name, column.name, parent.name, ref_column
                );
                inferred.push((
                    idx,
                    ForeignKey {
                        column: column.name.clone(),
                        ref_table: parent.name.clone(),
                        ref_column,
                        source: ForeignKeySource::Implicit,
                    },
                ));
            }
        }
    }

    let added = inferred.len();
    for (idx, fk) in inferred {
        snapshot.tables[idx].foreign_keys.push(fk);
    }
    added
}

/// `role_id` -> `role`, `roleid` -> `role`.
fn implicit_base_name(lower: &str) -> Option<String> {
    let stem = lower.strip_suffix("id")?;
    let stem = stem.strip_suffix('_').unwrap_or(stem);
    (!stem.is_empty()).then(|| stem.to_string())
}

fn candidate_names(base: &str) -> Vec<String> {
    let mut names = vec![base.to_string(), format!("{}s", base)];
    if let Some(singular) = base.strip_suffix('s') {
        if !singular.is_empty() {
            names.push(singular.to_string());
        }
    }
    names
}
