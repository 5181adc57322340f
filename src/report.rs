// Consolidated monthly report document.
//
// The report carries the same aggregates twice: once in the current schema
// (`BikeStatistics`/`GuideStatistics`/`PathStatistics`) and once in the
// legacy schema (`Bikes`/`Guides`/`Paths`) that older downstream consumers
// still parse. The two serializers are independent pure functions over the
// same statistics records; element and attribute names are load-bearing and
// must not change.
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::writer::Writer;

use crate::analytics::month_window;
use crate::error::{Result, StatsError};
use crate::model::{BikeStats, CyclingStats, GuideStats, MonthlySummary, PathStats};

type WriteResult = std::io::Result<()>;

impl CyclingStats {
    /// Runs every aggregation for the requested month and serializes the
    /// consolidated report. Entity listings ascend by id; hours are
    /// truncated to whole numbers, money keeps its exact decimal text,
    /// percentages use one decimal place and satisfaction averages two.
    pub fn export_monthly_report(&self, year: i32, month: u32) -> Result<String> {
        let bike_stats = self.monthly_bike_stats(year, month)?;
        let (start, end) = month_window(year, month)?;
        let guide_stats = self.guide_performance(start, end);
        let path_stats = self.path_analytics(1);
        let occupancy = self.occupancy_rates(31);
        let summary = self.monthly_aggregation(year, month)?;

        let mut out = Vec::new();
        let mut wr = Writer::new_with_indent(&mut out, b' ', 2);

        let mut root = BytesStart::new("MonthlyReport");
        root.push_attribute(("year", year.to_string().as_str()));
        root.push_attribute(("month", month.to_string().as_str()));
        let generated = chrono::Local::now()
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        root.push_attribute(("generated", generated.as_str()));
        wr.write_event(Event::Start(root))?;

        write_summary(&mut wr, &summary)?;
        write_current_sections(&mut wr, &bike_stats, &guide_stats, &path_stats)?;
        write_legacy_sections(&mut wr, &bike_stats, &guide_stats, &path_stats, &occupancy)?;

        wr.write_event(Event::End(BytesStart::new("MonthlyReport").to_end()))?;
        String::from_utf8(out).map_err(|e| StatsError::XmlParse(e.to_string()))
    }
}

fn write_summary<W: Write>(wr: &mut Writer<W>, summary: &MonthlySummary) -> WriteResult {
    wr.write_event(Event::Start(BytesStart::new("Summary")))?;
    write_text_el(wr, "TotalRevenue", &summary.total_revenue.to_string())?;
    write_text_el(wr, "TotalBookings", &summary.total_bookings.to_string())?;
    write_text_el(
        wr,
        "TotalMaintenanceCost",
        &summary.total_maintenance_cost.to_string(),
    )?;
    wr.write_event(Event::End(BytesStart::new("Summary").to_end()))
}

fn write_current_sections<W: Write>(
    wr: &mut Writer<W>,
    bikes: &BTreeMap<String, BikeStats>,
    guides: &BTreeMap<String, GuideStats>,
    paths: &BTreeMap<String, PathStats>,
) -> WriteResult {
    wr.write_event(Event::Start(BytesStart::new("BikeStatistics")))?;
    for (bid, b) in bikes {
        let mut be = BytesStart::new("Bike");
        be.push_attribute(("id", bid.as_str()));
        wr.write_event(Event::Start(be))?;

        let mut util = BytesStart::new("Utilization");
        util.push_attribute(("totalHours", (b.total_hours as i64).to_string().as_str()));
        util.push_attribute(("rentalHours", (b.rental_hours as i64).to_string().as_str()));
        util.push_attribute((
            "maintenanceHours",
            (b.maintenance_hours as i64).to_string().as_str(),
        ));
        wr.write_event(Event::Empty(util))?;

        write_text_el(wr, "Revenue", &b.total_revenue.to_string())?;
        write_text_el(wr, "MaintenanceCost", &b.maintenance_cost.to_string())?;
        wr.write_event(Event::End(BytesStart::new("Bike").to_end()))?;
    }
    wr.write_event(Event::End(BytesStart::new("BikeStatistics").to_end()))?;

    wr.write_event(Event::Start(BytesStart::new("GuideStatistics")))?;
    for (gid, g) in guides {
        let mut ge = BytesStart::new("Guide");
        ge.push_attribute(("id", gid.as_str()));
        wr.write_event(Event::Start(ge))?;

        let mut tours = BytesStart::new("Tours");
        tours.push_attribute(("count", g.total_tours.to_string().as_str()));
        tours.push_attribute((
            "total-participants",
            g.total_participants.to_string().as_str(),
        ));
        wr.write_event(Event::Empty(tours))?;

        write_text_el(wr, "Revenue", &g.revenue_generated.to_string())?;
        write_string_list(wr, "Regions", "Region", &g.regions)?;
        write_string_list(wr, "Languages", "Language", &g.languages)?;
        wr.write_event(Event::End(BytesStart::new("Guide").to_end()))?;
    }
    wr.write_event(Event::End(BytesStart::new("GuideStatistics").to_end()))?;

    wr.write_event(Event::Start(BytesStart::new("PathStatistics")))?;
    for (pid, p) in paths {
        let mut pe = BytesStart::new("Path");
        pe.push_attribute(("id", pid.as_str()));
        wr.write_event(Event::Start(pe))?;

        let mut usage = BytesStart::new("Usage");
        usage.push_attribute(("total-uses", p.total_trips.to_string().as_str()));
        usage.push_attribute((
            "total-participants",
            p.total_participants.to_string().as_str(),
        ));
        usage.push_attribute((
            "completion-rate",
            format!("{:.1}", p.completion_rate).as_str(),
        ));
        usage.push_attribute((
            "avg-satisfaction",
            format!("{:.2}", p.avg_satisfaction).as_str(),
        ));
        wr.write_event(Event::Empty(usage))?;
        wr.write_event(Event::End(BytesStart::new("Path").to_end()))?;
    }
    wr.write_event(Event::End(BytesStart::new("PathStatistics").to_end()))
}

fn write_legacy_sections<W: Write>(
    wr: &mut Writer<W>,
    bikes: &BTreeMap<String, BikeStats>,
    guides: &BTreeMap<String, GuideStats>,
    paths: &BTreeMap<String, PathStats>,
    occupancy: &BTreeMap<String, f64>,
) -> WriteResult {
    wr.write_event(Event::Start(BytesStart::new("Bikes")))?;
    for (bid, b) in bikes {
        let mut be = BytesStart::new("Bike");
        be.push_attribute(("id", bid.as_str()));
        wr.write_event(Event::Start(be))?;
        write_text_el(wr, "TotalHours", &(b.total_hours as i64).to_string())?;
        write_text_el(wr, "RentalHours", &(b.rental_hours as i64).to_string())?;
        write_text_el(
            wr,
            "MaintenanceHours",
            &(b.maintenance_hours as i64).to_string(),
        )?;
        write_text_el(wr, "Revenue", &b.total_revenue.to_string())?;
        write_text_el(wr, "BookingCount", &b.booking_count.to_string())?;
        let rate = occupancy.get(bid).copied().unwrap_or(0.0);
        write_text_el(wr, "OccupancyRate", &format!("{rate:.2}"))?;
        wr.write_event(Event::End(BytesStart::new("Bike").to_end()))?;
    }
    wr.write_event(Event::End(BytesStart::new("Bikes").to_end()))?;

    wr.write_event(Event::Start(BytesStart::new("Guides")))?;
    for (gid, g) in guides {
        let mut ge = BytesStart::new("Guide");
        ge.push_attribute(("id", gid.as_str()));
        wr.write_event(Event::Start(ge))?;
        write_text_el(wr, "TotalTours", &g.total_tours.to_string())?;
        write_text_el(wr, "TotalParticipants", &g.total_participants.to_string())?;
        write_string_list(wr, "Languages", "Language", &g.languages)?;
        write_string_list(wr, "Regions", "Region", &g.regions)?;
        wr.write_event(Event::End(BytesStart::new("Guide").to_end()))?;
    }
    wr.write_event(Event::End(BytesStart::new("Guides").to_end()))?;

    wr.write_event(Event::Start(BytesStart::new("Paths")))?;
    for (pid, p) in paths {
        let mut pe = BytesStart::new("Path");
        pe.push_attribute(("id", pid.as_str()));
        wr.write_event(Event::Start(pe))?;
        let mut stats_el = BytesStart::new("Statistics");
        stats_el.push_attribute(("totalTrips", p.total_trips.to_string().as_str()));
        stats_el.push_attribute((
            "avgSatisfaction",
            format!("{:.2}", p.avg_satisfaction).as_str(),
        ));
        wr.write_event(Event::Empty(stats_el))?;
        write_text_el(wr, "RevenueGenerated", &p.revenue_generated.to_string())?;
        wr.write_event(Event::End(BytesStart::new("Path").to_end()))?;
    }
    wr.write_event(Event::End(BytesStart::new("Paths").to_end()))
}

fn write_text_el<W: Write>(wr: &mut Writer<W>, name: &str, value: &str) -> WriteResult {
    wr.write_event(Event::Start(BytesStart::new(name)))?;
    wr.write_event(Event::Text(BytesText::new(value)))?;
    wr.write_event(Event::End(BytesStart::new(name).to_end()))
}

fn write_string_list<W: Write>(
    wr: &mut Writer<W>,
    container: &str,
    item: &str,
    values: &BTreeSet<String>,
) -> WriteResult {
    if values.is_empty() {
        return wr.write_event(Event::Empty(BytesStart::new(container)));
    }
    wr.write_event(Event::Start(BytesStart::new(container)))?;
    for v in values {
        write_text_el(wr, item, v)?;
    }
    wr.write_event(Event::End(BytesStart::new(container).to_end()))
}
