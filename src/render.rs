use reqwest::Url;
use serde::Serialize;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use time_tz::{OffsetDateTimeExt, Tz};
use tracing::warn;

use crate::search::Item;
use crate::storage::Subscription;

static DATE_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[day]/[month]/[year], [hour]:[minute]:[second]");

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub color: u32,
    pub timezone: &'static Tz,
}

/// A rendered item, ready to be handed to a [`Notifier`](crate::notify::Notifier).
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub embed: Embed,
    pub buttons: Vec<LinkButton>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    pub url: Option<String>,
    pub image: Option<String>,
    pub color: u32,
    pub fields: Vec<Field>,
    pub author: Author,
    pub footer: String,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub url: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LinkButton {
    pub label: String,
    pub emoji: String,
    pub url: String,
}

fn currency_symbol(code: Option<&str>) -> &str {
    match code {
        None | Some("EUR") => "€",
        Some("GBP") => "£",
        Some("USD") => "$",
        Some("PLN") => "zł",
        Some("CZK") => "Kč",
        Some(code) => code,
    }
}

fn published(item: &Item, timezone: &Tz) -> String {
    if item.freshness <= 0 {
        return "unknown".into();
    }

    OffsetDateTime::from_unix_timestamp(item.freshness)
        .ok()
        .and_then(|date| {
            date.to_timezone(timezone)
                .format(DATE_FORMAT)
                .inspect_err(|e| warn!("could not format the publication date {date}: {e:#}"))
                .ok()
        })
        .unwrap_or_else(|| "unknown".into())
}

fn buy_url(sub: &Subscription, item_id: u64) -> Option<String> {
    let search = Url::parse(&sub.query).ok()?;
    let host = search.host_str()?;

    Some(format!(
        "{}://{host}/transaction/buy/new?source_screen=item&{}={item_id}",
        search.scheme(),
        urlencoding::encode("transaction[item_id]"),
    ))
}

pub fn render(item: &Item, sub: &Subscription, opts: &RenderOptions) -> Notification {
    let price = match &item.price {
        Some(price) => format!("{price} {}", currency_symbol(item.currency.as_deref())),
        None => "-".into(),
    };

    let embed = Embed {
        title: item.title.clone().unwrap_or_else(|| "Unknown".into()),
        url: item.url.clone(),
        image: item.image.clone(),
        color: opts.color,
        fields: vec![
            Field {
                name: "Price".into(),
                value: price,
                inline: true,
            },
            Field {
                name: "Size".into(),
                value: item.size.clone().unwrap_or_else(|| "-".into()),
                inline: true,
            },
        ],
        author: Author {
            name: format!(
                "Posted by {}",
                item.seller.name.as_deref().unwrap_or("unknown")
            ),
            url: item.seller.profile_url.clone(),
        },
        footer: format!(
            "Published on {} • Subscription #{}",
            published(item, opts.timezone),
            sub.id,
        ),
    };

    let mut buttons = vec![];

    if let Some(url) = &item.url {
        buttons.push(LinkButton {
            label: "View article".into(),
            emoji: "🛍".into(),
            url: url.clone(),
        });
    }

    buttons.push(LinkButton {
        label: "Search list".into(),
        emoji: "🔍".into(),
        url: sub.query.clone(),
    });

    if let Some(url) = item.id.and_then(|id| buy_url(sub, id)) {
        buttons.push(LinkButton {
            label: "Buy".into(),
            emoji: "💵".into(),
            url,
        });
    }

    Notification { embed, buttons }
}
