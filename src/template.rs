use std::fmt::{self, Display};

use handlebars::{handlebars_helper, Handlebars};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Index,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
        }
    }
}

impl Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

handlebars_helper!(unix_date: |ts: i64| {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|date| date.format(&Rfc3339).ok())
        .unwrap_or_else(|| ts.to_string())
});

pub fn new() -> Handlebars<'static> {
    let mut tt = Handlebars::new();
    tt.set_strict_mode(true);
    tt.register_helper("unix_date", Box::new(unix_date));
    tt.register_template_string(
        Template::Index.as_str(),
        include_str!("template/index.hbs"),
    )
    .unwrap();

    tt
}
