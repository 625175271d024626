use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a property is offered on the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListingType {
    ForSale,
    ForRent,
    Sold,
    Leased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Amenity {
    Pool,
    Gym,
    Parking,
    Garage,
    Garden,
    Balcony,
    AirConditioning,
    Waterfront,
    Study,
    Fireplace,
}

impl Amenity {
    /// Spoken keyword that selects this amenity.
    pub fn keyword(&self) -> &'static str {
        match self {
            Amenity::Pool => "pool",
            Amenity::Gym => "gym",
            Amenity::Parking => "parking",
            Amenity::Garage => "garage",
            Amenity::Garden => "garden",
            Amenity::Balcony => "balcony",
            Amenity::AirConditioning => "air conditioning",
            Amenity::Waterfront => "waterfront",
            Amenity::Study => "study",
            Amenity::Fireplace => "fireplace",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Amenity> {
        const ALL: &[Amenity] = &[
            Amenity::Pool,
            Amenity::Gym,
            Amenity::Parking,
            Amenity::Garage,
            Amenity::Garden,
            Amenity::Balcony,
            Amenity::AirConditioning,
            Amenity::Waterfront,
            Amenity::Study,
            Amenity::Fireplace,
        ];
        ALL.iter().copied().find(|a| a.keyword() == word)
    }
}

/// Permanent marketplace tags a search can pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermanentTag {
    New,
    Premium,
    OpenHouse,
    Auction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareFootageRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

/// Every field the UI can highlight when a conversation turn sets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamField {
    Location,
    PropertyType,
    ListingType,
    PriceRange,
    Bedrooms,
    Bathrooms,
    SquareFootage,
    Amenities,
    Style,
    Tags,
}

/// The accumulating, partially-filled structured query extracted from
/// conversation. Every field is optional: absence means unconstrained, never
/// a sentinel. Fields are only overwritten or appended during a session;
/// nothing is cleared except by `reset`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_type: Option<ListingType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_range: Option<PriceRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bathrooms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub square_footage: Option<SquareFootageRange>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub amenities: Vec<Amenity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_image_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<PermanentTag>,
}

/// One batch of field assignments. Produced by tool-call arguments on the
/// live path and by keyword rules on the demo path; both feed `merge`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamUpdate {
    pub location: Option<String>,
    pub property_type: Option<String>,
    pub listing_type: Option<ListingType>,
    pub price_min: Option<u64>,
    pub price_max: Option<u64>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub square_footage_min: Option<u32>,
    pub square_footage_max: Option<u32>,
    pub amenities: Vec<Amenity>,
    pub style: Option<String>,
    pub style_image_url: Option<String>,
    pub tags: Vec<PermanentTag>,
}

impl ParamUpdate {
    /// Map `searchProperties` tool arguments onto an update. Unknown or
    /// malformed fields are skipped rather than failing the turn.
    pub fn from_search_args(args: &Value) -> ParamUpdate {
        let mut update = ParamUpdate::default();
        update.location = args
            .get("location")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string());
        update.property_type = args
            .get("propertyType")
            .and_then(|v| v.as_str())
            .map(|s| s.to_lowercase());
        update.listing_type = args
            .get("listingType")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        update.price_min = args.get("priceMin").and_then(|v| v.as_u64());
        update.price_max = args.get("priceMax").and_then(|v| v.as_u64());
        update.bedrooms = args
            .get("bedroomsMin")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32);
        update.bathrooms = args
            .get("bathroomsMin")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32);
        if let Some(list) = args.get("amenities").and_then(|v| v.as_array()) {
            for entry in list {
                if let Some(a) = entry.as_str().and_then(Amenity::from_keyword) {
                    update.amenities.push(a);
                }
            }
        }
        update
    }

    pub fn is_empty(&self) -> bool {
        *self == ParamUpdate::default()
    }
}

impl SearchParameters {
    /// Apply one update. Scalar fields overwrite, set fields append without
    /// duplicates. Returns the fields that actually changed, in a stable
    /// order, the glow/highlight contract shared by the live and
    /// demo paths.
    pub fn merge(&mut self, update: &ParamUpdate) -> Vec<ParamField> {
        let mut changed = Vec::new();

        if let Some(ref location) = update.location {
            if self.location.as_deref() != Some(location.as_str()) {
                self.location = Some(location.clone());
                changed.push(ParamField::Location);
            }
        }
        if let Some(ref property_type) = update.property_type {
            if self.property_type.as_deref() != Some(property_type.as_str()) {
                self.property_type = Some(property_type.clone());
                changed.push(ParamField::PropertyType);
            }
        }
        if let Some(listing_type) = update.listing_type {
            if self.listing_type != Some(listing_type) {
                self.listing_type = Some(listing_type);
                changed.push(ParamField::ListingType);
            }
        }
        if update.price_min.is_some() || update.price_max.is_some() {
            let mut range = self.price_range.unwrap_or_default();
            if update.price_min.is_some() {
                range.min = update.price_min;
            }
            if update.price_max.is_some() {
                range.max = update.price_max;
            }
            if self.price_range != Some(range) {
                self.price_range = Some(range);
                changed.push(ParamField::PriceRange);
            }
        }
        if let Some(bedrooms) = update.bedrooms {
            if self.bedrooms != Some(bedrooms) {
                self.bedrooms = Some(bedrooms);
                changed.push(ParamField::Bedrooms);
            }
        }
        if let Some(bathrooms) = update.bathrooms {
            if self.bathrooms != Some(bathrooms) {
                self.bathrooms = Some(bathrooms);
                changed.push(ParamField::Bathrooms);
            }
        }
        if update.square_footage_min.is_some() || update.square_footage_max.is_some() {
            let mut range = self.square_footage.unwrap_or_default();
            if update.square_footage_min.is_some() {
                range.min = update.square_footage_min;
            }
            if update.square_footage_max.is_some() {
                range.max = update.square_footage_max;
            }
            if self.square_footage != Some(range) {
                self.square_footage = Some(range);
                changed.push(ParamField::SquareFootage);
            }
        }
        let mut amenities_changed = false;
        for amenity in &update.amenities {
            if !self.amenities.contains(amenity) {
                self.amenities.push(*amenity);
                amenities_changed = true;
            }
        }
        if amenities_changed {
            changed.push(ParamField::Amenities);
        }
        if let Some(ref style) = update.style {
            if self.style.as_deref() != Some(style.as_str()) {
                self.style = Some(style.clone());
                changed.push(ParamField::Style);
            }
        }
        if let Some(ref url) = update.style_image_url {
            self.style_image_url = Some(url.clone());
        }
        let mut tags_changed = false;
        for tag in &update.tags {
            if !self.tags.contains(tag) {
                self.tags.push(*tag);
                tags_changed = true;
            }
        }
        if tags_changed {
            changed.push(ParamField::Tags);
        }

        changed
    }

    /// Explicit reset, the only operation that clears fields.
    pub fn reset(&mut self) {
        *self = SearchParameters::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == SearchParameters::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_reports_changed_fields() {
        let mut params = SearchParameters::default();
        let update = ParamUpdate {
            location: Some("Sydney".into()),
            bedrooms: Some(2),
            amenities: vec![Amenity::Pool],
            ..ParamUpdate::default()
        };
        let changed = params.merge(&update);
        assert_eq!(
            changed,
            vec![ParamField::Location, ParamField::Bedrooms, ParamField::Amenities]
        );
        assert_eq!(params.location.as_deref(), Some("Sydney"));
        assert_eq!(params.bedrooms, Some(2));
        assert_eq!(params.amenities, vec![Amenity::Pool]);
    }

    #[test]
    fn merge_never_clears_and_deduplicates_sets() {
        let mut params = SearchParameters::default();
        params.merge(&ParamUpdate {
            location: Some("Bondi".into()),
            amenities: vec![Amenity::Pool],
            ..ParamUpdate::default()
        });
        // An update that says nothing about location leaves it alone.
        let changed = params.merge(&ParamUpdate {
            amenities: vec![Amenity::Pool, Amenity::Gym],
            ..ParamUpdate::default()
        });
        assert_eq!(changed, vec![ParamField::Amenities]);
        assert_eq!(params.location.as_deref(), Some("Bondi"));
        assert_eq!(params.amenities, vec![Amenity::Pool, Amenity::Gym]);
    }

    #[test]
    fn price_range_halves_merge_independently() {
        let mut params = SearchParameters::default();
        params.merge(&ParamUpdate {
            price_max: Some(1_500_000),
            ..ParamUpdate::default()
        });
        params.merge(&ParamUpdate {
            price_min: Some(800_000),
            ..ParamUpdate::default()
        });
        assert_eq!(
            params.price_range,
            Some(PriceRange {
                min: Some(800_000),
                max: Some(1_500_000)
            })
        );
    }

    #[test]
    fn reset_clears_everything() {
        let mut params = SearchParameters::default();
        params.merge(&ParamUpdate {
            location: Some("Manly".into()),
            tags: vec![PermanentTag::Auction],
            ..ParamUpdate::default()
        });
        params.reset();
        assert!(params.is_empty());
    }

    #[test]
    fn search_args_map_onto_update() {
        let args = json!({
            "location": "Surry Hills",
            "priceMin": 600000,
            "priceMax": 900000,
            "bedroomsMin": 3,
            "propertyType": "Townhouse",
            "amenities": ["parking", "balcony", "helipad"]
        });
        let update = ParamUpdate::from_search_args(&args);
        assert_eq!(update.location.as_deref(), Some("Surry Hills"));
        assert_eq!(update.price_min, Some(600_000));
        assert_eq!(update.price_max, Some(900_000));
        assert_eq!(update.bedrooms, Some(3));
        assert_eq!(update.property_type.as_deref(), Some("townhouse"));
        // Unknown amenity names are skipped, not errors.
        assert_eq!(update.amenities, vec![Amenity::Parking, Amenity::Balcony]);
    }
}
