//! Shared `User` record type for the insert/query demos.

use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
#[dynamorm(table = "users")]
pub struct User {
    #[pk]
    pub email: String,

    /// Backs the `by_name` GSI the typeahead/composite-query demos search.
    #[dynamorm(index = "by_name", role = "pk")]
    pub name: String,

    pub count: i32,
}

impl User {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            count: 100,
        }
    }
}
