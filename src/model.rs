// Document loader, reference caches and the statistics records.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::dom::{parse_document, Element, Locator};
use crate::error::Result;

/// Monthly utilization of one bike. Hours are physical quantities and use
/// floats; money stays in exact decimals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BikeStats {
    pub total_hours: f64,
    pub rental_hours: f64,
    pub maintenance_hours: f64,
    pub total_revenue: Decimal,
    pub booking_count: u32,
    pub maintenance_cost: Decimal,
}

/// Activity of one guide over a caller-supplied window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GuideStats {
    pub total_tours: u32,
    pub total_participants: u32,
    pub languages: BTreeSet<String>,
    pub regions: BTreeSet<String>,
    pub revenue_generated: Decimal,
}

/// Popularity and satisfaction of one path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PathStats {
    pub total_trips: u32,
    pub total_participants: u32,
    pub revenue_generated: Decimal,
    pub avg_satisfaction: f64,
    pub completion_rate: f64,
    /// Trip count per calendar month, keyed `YYYY-MM`.
    pub popular_periods: BTreeMap<String, u32>,
    pub regions: BTreeSet<String>,
}

/// Flat fold of bike utilization and path analytics for one month.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MonthlySummary {
    pub total_revenue: Decimal,
    pub total_bookings: u32,
    pub total_maintenance_cost: Decimal,
    pub bikes_in_service: u32,
    pub total_tours: u32,
    pub total_participants: u32,
}

/// How a tour package price applies when a trip group runs it.
///
/// The convention is inferred from document structure, once, at load time:
/// exports without a `clients` section price per participant, exports with
/// one (even empty) carry flat per-group prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PricingMode {
    PerParticipant,
    PerGroup,
}

/// The loaded document: bound top-level sections plus the reference caches.
///
/// Everything is immutable after construction; every aggregation method
/// takes `&self` and may be called any number of times with identical
/// results. The caches hold id relationships only, so they stay valid
/// across any time window a caller asks about.
pub struct CyclingStats {
    pub(crate) root: Element,
    pub(crate) locator: Locator,
    pub(crate) bikes: Option<Element>,
    pub(crate) bookings: Option<Element>,
    pub(crate) guides: Option<Element>,
    pub(crate) paths: Option<Element>,
    pub(crate) destinations: Option<Element>,
    pub(crate) maintenances: Option<Element>,
    pub(crate) tour_packages: Option<Element>,
    pub(crate) trip_groups: Option<Element>,
    pub(crate) pricing: PricingMode,
    pub(crate) package_path: HashMap<String, String>,
    pub(crate) package_guide: HashMap<String, String>,
    pub(crate) path_regions: HashMap<String, BTreeSet<String>>,
    pub(crate) guide_languages: HashMap<String, BTreeSet<String>>,
}

impl CyclingStats {
    /// Loads and parses the document at `path`.
    ///
    /// An unreadable or wholly unparseable file is the only fatal case;
    /// recoverable markup problems and missing sections are tolerated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let xml = fs::read_to_string(path)?;
        Self::from_xml(&xml)
    }

    /// Parses an in-memory document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let root = parse_document(xml)?;
        let locator = Locator::new(root.namespace.clone());

        let section = |name: &str| -> Option<Element> {
            let found = locator.find(Some(&root), name).cloned();
            if found.is_none() {
                debug!(section = name, "optional section absent");
            }
            found
        };

        let bikes = section("bikes");
        let bookings = section("bookings");
        let guides = section("guides");
        let paths = section("paths");
        let destinations = section("destinations");
        let clients = section("clients");
        let maintenances = section("maintenances");
        let tour_packages = section("tourPackages");
        let trip_groups = section("tripGroups");

        let pricing = if clients.is_some() {
            PricingMode::PerGroup
        } else {
            PricingMode::PerParticipant
        };

        let caches = ReferenceCaches::build(
            &locator,
            tour_packages.as_ref(),
            paths.as_ref(),
            destinations.as_ref(),
            guides.as_ref(),
        );

        Ok(Self {
            root,
            locator,
            bikes,
            bookings,
            guides,
            paths,
            destinations,
            maintenances,
            tour_packages,
            trip_groups,
            pricing,
            package_path: caches.package_path,
            package_guide: caches.package_guide,
            path_regions: caches.path_regions,
            guide_languages: caches.guide_languages,
        })
    }

    pub fn pricing_mode(&self) -> PricingMode {
        self.pricing
    }

    // Read-through helpers: cache first, live document lookup second, so
    // both trip-group aggregations behave identically even against a
    // partially built cache.

    pub(crate) fn package_element(&self, package_id: &str) -> Option<&Element> {
        self.locator
            .find_by_id(self.tour_packages.as_ref(), "tourPackage", package_id)
    }

    pub(crate) fn guide_for_package(&self, package_id: &str) -> Option<String> {
        if let Some(gid) = self.package_guide.get(package_id) {
            return Some(gid.clone());
        }
        self.locator
            .find_text(self.package_element(package_id), "assignedGuideRef")
            .map(str::to_string)
    }

    pub(crate) fn path_for_package(&self, package_id: &str) -> Option<String> {
        if let Some(pid) = self.package_path.get(package_id) {
            return Some(pid.clone());
        }
        self.locator
            .find_text(self.package_element(package_id), "includedPathRef")
            .map(str::to_string)
    }

    pub(crate) fn regions_for_path(&self, path_id: &str) -> BTreeSet<String> {
        if let Some(regions) = self.path_regions.get(path_id) {
            return regions.clone();
        }
        // Live resolution mirrors the cache builder for paths the cache
        // does not hold.
        let mut regions = BTreeSet::new();
        if let Some(path) = self.locator.find_by_id(self.paths.as_ref(), "path", path_id) {
            for dest_ref in ["startRef", "endRef"] {
                let Some(dest_id) = self.locator.find_text(Some(path), dest_ref) else {
                    continue;
                };
                let dest = self
                    .locator
                    .find_by_id(self.destinations.as_ref(), "destination", dest_id);
                if let Some(region) = self.locator.find_text(dest, "region") {
                    regions.insert(region.to_string());
                }
            }
        }
        regions
    }
}

// The four id-relationship lookup tables, built in one pass each at load
// time. Entries with missing ids are skipped; the tables are read-only from
// then on.
#[derive(Debug, Default)]
struct ReferenceCaches {
    package_path: HashMap<String, String>,
    package_guide: HashMap<String, String>,
    path_regions: HashMap<String, BTreeSet<String>>,
    guide_languages: HashMap<String, BTreeSet<String>>,
}

impl ReferenceCaches {
    fn build(
        locator: &Locator,
        tour_packages: Option<&Element>,
        paths: Option<&Element>,
        destinations: Option<&Element>,
        guides: Option<&Element>,
    ) -> Self {
        let mut caches = Self::default();

        for pkg in locator.find_all(tour_packages, "tourPackage") {
            let Some(pid) = pkg.attr("id") else { continue };
            if let Some(path_ref) = locator.find_text(Some(pkg), "includedPathRef") {
                caches
                    .package_path
                    .insert(pid.to_string(), path_ref.to_string());
            }
            if let Some(guide_ref) = locator.find_text(Some(pkg), "assignedGuideRef") {
                caches
                    .package_guide
                    .insert(pid.to_string(), guide_ref.to_string());
            }
        }

        if destinations.is_some() {
            for path in locator.find_all(paths, "path") {
                let Some(pid) = path.attr("id") else { continue };
                let mut regions = BTreeSet::new();
                for dest_ref in ["startRef", "endRef"] {
                    let Some(dest_id) = locator.find_text(Some(path), dest_ref) else {
                        continue;
                    };
                    let dest = locator.find_by_id(destinations, "destination", dest_id);
                    if let Some(region) = locator.find_text(dest, "region") {
                        regions.insert(region.to_string());
                    }
                }
                if !regions.is_empty() {
                    caches.path_regions.insert(pid.to_string(), regions);
                }
            }
        }

        for guide in locator.find_all(guides, "guide") {
            let Some(gid) = guide.attr("id") else { continue };
            let langs_node = locator.find(Some(guide), "languages");
            let langs: BTreeSet<String> = locator
                .find_all(langs_node, "language")
                .iter()
                .filter_map(|l| l.text())
                .map(str::to_string)
                .collect();
            if !langs.is_empty() {
                caches.guide_languages.insert(gid.to_string(), langs);
            }
        }

        debug!(
            packages = caches.package_path.len(),
            guides = caches.guide_languages.len(),
            paths = caches.path_regions.len(),
            "reference caches built"
        );
        caches
    }
}
