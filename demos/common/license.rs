//! Shared `License` record type for the envelope-encryption demo.

use dynamorm::DynamormTable;

#[derive(Debug, Default, DynamormTable)]
#[dynamorm(table = "licenses")]
pub struct License {
    #[pk]
    pub email: String,

    #[encrypted]
    pub number: String,

    #[encrypted]
    pub expires: String,

    pub reviewed_at: Option<String>,
}

impl License {
    pub fn new(
        email: impl Into<String>,
        number: impl Into<String>,
        expires: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            number: number.into(),
            expires: expires.into(),
            reviewed_at: None,
        }
    }
}
