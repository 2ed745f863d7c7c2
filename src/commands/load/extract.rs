//! Pure extraction: one raw record in, typed row drafts out.
//!
//! Nothing here touches storage. Every nested read degrades to a default on
//! shape mismatch; only a non-object top level is an error, reported against
//! the record's ordinal by the caller.

use anyhow::{Result, bail};
use serde_json::{Map, Value};

use crate::shape::{
    Coercions, Shape, array_field, field, flag_field, map_field, scalar_text, shape_of, text_field,
};

#[derive(Debug, Clone)]
pub struct PersonDraft {
    pub slug: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub name: Option<String>,
    pub linkedin_url: Option<String>,
    pub facebook_url: Option<String>,
    pub twitter_url: Option<String>,
    pub crunchbase_url: Option<String>,
    pub angellist_url: Option<String>,
    pub url: Option<String>,
    pub is_me: bool,
    pub first_degree_count: Option<i64>,
    pub is_on_target_list: bool,
}

#[derive(Debug, Clone)]
pub struct FirmDraft {
    pub name: Option<String>,
    pub slug: String,
    pub current_fund_size: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocationDraft {
    pub display_name: String,
    pub kind: String,
}

#[derive(Debug, Clone)]
pub struct SchoolDraft {
    pub name: String,
    pub display_name: String,
    pub total_student_count: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CompanyDraft {
    pub name: String,
    pub display_name: String,
    pub total_employee_count: Option<i64>,
}

/// Dimension drafts for one record. Any of the three may be absent; the
/// investor row is emitted either way.
#[derive(Debug, Default)]
pub struct DimensionDrafts {
    pub person: Option<PersonDraft>,
    pub firm: Option<FirmDraft>,
    pub location: Option<LocationDraft>,
}

#[derive(Debug, Clone)]
pub struct InvestorDraft {
    pub position: Option<String>,
    pub headline: Option<String>,
    pub previous_position: Option<String>,
    pub previous_firm: Option<String>,
    pub min_investment: Option<String>,
    pub max_investment: Option<String>,
    pub target_investment: Option<String>,
    pub areas_of_interest_freeform: Option<String>,
    pub no_current_interest_freeform: Option<String>,
    pub vote_count: i64,
    pub leads_rounds: Option<String>,
    pub claimed: bool,
    pub can_edit: bool,
    pub include_in_list: bool,
    pub in_founder_investor_list: bool,
    pub in_diverse_investor_list: bool,
    pub in_female_investor_list: bool,
    pub in_invests_in_diverse_founders_investor_list: bool,
    pub in_invests_in_female_founders_investor_list: bool,
    pub has_profile_vote: bool,
}

/// One `kind` + `display_name` pair; shared by areas of interest, investment
/// locations, and stages.
#[derive(Debug, Clone)]
pub struct InterestDraft {
    pub kind: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageDraft {
    pub url: String,
    pub edit_mode: bool,
}

#[derive(Debug, Clone)]
pub struct MediaDraft {
    pub url: Option<String>,
    pub title: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvestmentDraft {
    pub company_display_name: String,
    pub total_raised_json: Option<String>,
}

#[derive(Debug, Default)]
pub struct ChildDrafts {
    pub areas_of_interest: Vec<InterestDraft>,
    pub investment_locations: Vec<InterestDraft>,
    pub stages: Vec<InterestDraft>,
    pub images: Vec<ImageDraft>,
    pub media_links: Vec<MediaDraft>,
    pub investments: Vec<InvestmentDraft>,
}

#[derive(Debug, Clone)]
pub struct PositionDraft {
    pub company: Option<CompanyDraft>,
    pub title: Option<String>,
    pub start_month: Option<String>,
    pub start_year: Option<String>,
    pub end_month: Option<String>,
    pub end_year: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DegreeDraft {
    pub school: Option<SchoolDraft>,
    pub degree_name: Option<String>,
    pub field_of_study: Option<String>,
}

/// Career rows, consumed only when the record's person resolved to an id.
#[derive(Debug, Default)]
pub struct CareerDrafts {
    pub positions: Vec<PositionDraft>,
    pub degrees: Vec<DegreeDraft>,
}

#[derive(Debug)]
pub struct Extractor {
    coercions: Coercions,
}

impl Extractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            coercions: Coercions::new()?,
        })
    }

    pub fn dimension_drafts(&self, record: &Value, ordinal: usize) -> Result<DimensionDrafts> {
        let map = record_map(record)?;

        Ok(DimensionDrafts {
            person: self.person_draft(map, ordinal),
            firm: self.firm_draft(map, ordinal),
            location: self.location_draft(map),
        })
    }

    pub fn investor_draft(&self, record: &Value) -> Result<InvestorDraft> {
        let map = record_map(record)?;

        Ok(InvestorDraft {
            position: text_field(map, "position"),
            headline: text_field(map, "headline"),
            previous_position: text_field(map, "previous_position"),
            previous_firm: text_field(map, "previous_firm"),
            min_investment: text_field(map, "min_investment"),
            max_investment: text_field(map, "max_investment"),
            target_investment: text_field(map, "target_investment"),
            areas_of_interest_freeform: text_field(map, "areas_of_interest_freeform"),
            no_current_interest_freeform: text_field(map, "no_current_interest_freeform"),
            vote_count: self.coercions.count_field(map, "vote_count").unwrap_or(0),
            leads_rounds: text_field(map, "leads_rounds"),
            claimed: flag_field(map, "claimed"),
            can_edit: flag_field(map, "can_edit"),
            include_in_list: flag_field(map, "include_in_list"),
            in_founder_investor_list: flag_field(map, "in_founder_investor_list"),
            in_diverse_investor_list: flag_field(map, "in_diverse_investor_list"),
            in_female_investor_list: flag_field(map, "in_female_investor_list"),
            in_invests_in_diverse_founders_investor_list: flag_field(
                map,
                "in_invests_in_diverse_founders_investor_list",
            ),
            in_invests_in_female_founders_investor_list: flag_field(
                map,
                "in_invests_in_female_founders_investor_list",
            ),
            has_profile_vote: flag_field(map, "has_profile_vote"),
        })
    }

    pub fn child_drafts(&self, record: &Value) -> Result<ChildDrafts> {
        let map = record_map(record)?;
        let mut drafts = ChildDrafts::default();

        for element in mapping_elements(map, "areas_of_interest") {
            drafts.areas_of_interest.push(interest_draft(element));
        }

        for element in mapping_elements(map, "investment_locations") {
            drafts.investment_locations.push(interest_draft(element));
        }

        // Stage elements sometimes arrive wrapped in an `element` object.
        for element in mapping_elements(map, "stages") {
            drafts.stages.push(interest_draft(unwrap_element(element)));
        }

        collect_image_urls(map, "image_urls", false, &mut drafts.images);
        collect_image_urls(map, "image_urls_edit_mode", true, &mut drafts.images);

        for element in mapping_elements(map, "media_links") {
            let media = unwrap_element(element);
            drafts.media_links.push(MediaDraft {
                url: text_field(media, "url"),
                title: text_field(media, "title"),
                image_url: text_field(media, "image_url"),
            });
        }

        if let Some(investments) = map_field(map, "investments_on_record") {
            for edge in mapping_elements(investments, "edges") {
                let Some(node) = investment_node(edge) else {
                    continue;
                };
                // The company name is the identifying attribute; without it
                // the row is meaningless and is skipped.
                let Some(company_display_name) = text_field(node, "company_display_name") else {
                    continue;
                };

                drafts.investments.push(InvestmentDraft {
                    company_display_name,
                    total_raised_json: raised_payload(field(node, "total_raised")),
                });
            }
        }

        Ok(drafts)
    }

    pub fn career_drafts(&self, record: &Value) -> Result<CareerDrafts> {
        let map = record_map(record)?;
        let mut drafts = CareerDrafts::default();

        for element in mapping_elements(map, "positions") {
            let start = map_field(element, "start_date");
            let end = map_field(element, "end_date");

            drafts.positions.push(PositionDraft {
                company: self.company_draft(element),
                title: text_field(element, "title"),
                start_month: start.and_then(|dates| scalar_text(field(dates, "month"))),
                start_year: start.and_then(|dates| scalar_text(field(dates, "year"))),
                end_month: end.and_then(|dates| scalar_text(field(dates, "month"))),
                end_year: end.and_then(|dates| scalar_text(field(dates, "year"))),
            });
        }

        for element in mapping_elements(map, "degrees") {
            drafts.degrees.push(DegreeDraft {
                school: self.school_draft(element),
                degree_name: text_field(element, "name"),
                field_of_study: text_field(element, "field_of_study"),
            });
        }

        Ok(drafts)
    }

    fn person_draft(&self, map: &Map<String, Value>, ordinal: usize) -> Option<PersonDraft> {
        let person = map_field(map, "person").filter(|inner| !inner.is_empty())?;
        let slug = text_field(person, "slug").unwrap_or_else(|| format!("person-{ordinal}"));

        Some(PersonDraft {
            slug,
            first_name: text_field(person, "first_name"),
            last_name: text_field(person, "last_name"),
            name: text_field(person, "name"),
            linkedin_url: text_field(person, "linkedin_url"),
            facebook_url: text_field(person, "facebook_url"),
            twitter_url: text_field(person, "twitter_url"),
            crunchbase_url: text_field(person, "crunchbase_url"),
            angellist_url: text_field(person, "angellist_url"),
            url: text_field(person, "url"),
            is_me: flag_field(person, "is_me"),
            first_degree_count: self.coercions.count_field(person, "first_degree_count"),
            is_on_target_list: flag_field(person, "is_on_target_list"),
        })
    }

    fn firm_draft(&self, map: &Map<String, Value>, ordinal: usize) -> Option<FirmDraft> {
        let firm = map_field(map, "firm").filter(|inner| !inner.is_empty())?;
        let slug = text_field(firm, "slug").unwrap_or_else(|| format!("firm-{ordinal}"));

        Some(FirmDraft {
            name: text_field(firm, "name"),
            slug,
            current_fund_size: text_field(firm, "current_fund_size"),
        })
    }

    fn location_draft(&self, map: &Map<String, Value>) -> Option<LocationDraft> {
        let location = map_field(map, "location")?;
        let display_name = text_field(location, "display_name")?;
        let kind = text_field(location, "kind").unwrap_or_else(|| "location".to_string());

        Some(LocationDraft { display_name, kind })
    }

    fn company_draft(&self, position: &Map<String, Value>) -> Option<CompanyDraft> {
        let company = map_field(position, "company")?;
        let name = text_field(company, "name")?;
        let display_name = text_field(company, "display_name").unwrap_or_else(|| name.clone());

        Some(CompanyDraft {
            name,
            display_name,
            total_employee_count: self.coercions.count_field(company, "total_employee_count"),
        })
    }

    fn school_draft(&self, degree: &Map<String, Value>) -> Option<SchoolDraft> {
        let school = map_field(degree, "school")?;
        let name = text_field(school, "name")?;
        let display_name = text_field(school, "display_name").unwrap_or_else(|| name.clone());

        Some(SchoolDraft {
            name,
            display_name,
            total_student_count: self.coercions.count_field(school, "total_student_count"),
        })
    }
}

fn record_map(record: &Value) -> Result<&Map<String, Value>> {
    match record.as_object() {
        Some(map) => Ok(map),
        None => bail!("record is not a JSON object"),
    }
}

/// Mapping-shaped elements of a nested array; everything else in the array is
/// skipped silently.
fn mapping_elements<'a>(
    map: &'a Map<String, Value>,
    key: &str,
) -> impl Iterator<Item = &'a Map<String, Value>> {
    array_field(map, key)
        .iter()
        .filter_map(Value::as_object)
}

fn interest_draft(element: &Map<String, Value>) -> InterestDraft {
    InterestDraft {
        kind: text_field(element, "kind"),
        display_name: text_field(element, "display_name"),
    }
}

/// Some feeds wrap list entries as `{ "element": { ... } }`.
fn unwrap_element<'a>(element: &'a Map<String, Value>) -> &'a Map<String, Value> {
    map_field(element, "element").unwrap_or(element)
}

/// An investment edge carries its node either directly (`edge.node`) or one
/// level down (`edge.element.node`).
fn investment_node<'a>(edge: &'a Map<String, Value>) -> Option<&'a Map<String, Value>> {
    map_field(edge, "node").or_else(|| map_field(unwrap_element(edge), "node"))
}

/// The funding-amount payload is opaque to the schema; anything non-empty is
/// serialized to canonical JSON text.
fn raised_payload(value: Option<&Value>) -> Option<String> {
    match shape_of(value) {
        Shape::Missing | Shape::Null => None,
        Shape::Sequence(items) if items.is_empty() => None,
        _ => value.and_then(|payload| serde_json::to_string(payload).ok()),
    }
}

fn collect_image_urls(
    map: &Map<String, Value>,
    key: &str,
    edit_mode: bool,
    images: &mut Vec<ImageDraft>,
) {
    for element in array_field(map, key) {
        if let Some(url) = element.as_str().filter(|url| !url.is_empty()) {
            images.push(ImageDraft {
                url: url.to_string(),
                edit_mode,
            });
        }
    }
}
