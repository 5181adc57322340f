// Aggregation algorithms over the loaded document.
//
// Each method rescans the raw entities for its own window but reuses the
// reference caches built at load time. Data-quality problems (missing ids,
// unparseable dates or numbers) skip the affected contribution and never
// fail the aggregation; only a contract violation such as an invalid month
// number is an error.
use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::error::{Result, StatsError};
use crate::model::{BikeStats, CyclingStats, GuideStats, MonthlySummary, PathStats, PricingMode};

/// Lenient parse of the sortable ISO-8601-like date/time forms the exports
/// use. Date-only values resolve to midnight.
pub(crate) fn parse_instant(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse().ok()
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    Decimal::from_str_exact(s).or_else(|_| s.parse()).ok()
}

fn hours_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_seconds() as f64 / 3600.0
}

pub(crate) fn month_window(year: i32, month: u32) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let invalid = || StatsError::InvalidArgument(format!("invalid month {year}-{month}"));
    let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .ok_or_else(invalid)?;
    Ok((start.and_time(NaiveTime::MIN), end.and_time(NaiveTime::MIN)))
}

fn in_window(instant: NaiveDateTime, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    start <= instant && instant < end
}

impl CyclingStats {
    /// Per-bike utilization and revenue for one calendar month, keyed by
    /// bike id in ascending order.
    ///
    /// Maintenance is read from both historical shapes: the inline
    /// attribute form (`duration` defaulting to 0) and the nested `record`
    /// form (`duration` defaulting to 24 hours). Bookings are matched by
    /// `bikeId` attribute or `bikeRef` field and contribute whether they
    /// carry a single `date` inside the window or a `begin`/`end` interval
    /// overlapping it.
    pub fn monthly_bike_stats(&self, year: i32, month: u32) -> Result<BTreeMap<String, BikeStats>> {
        let (start, end) = month_window(year, month)?;
        let mut stats: BTreeMap<String, BikeStats> = BTreeMap::new();
        if self.bikes.is_none() {
            return Ok(stats);
        }

        for bike in self.locator.find_all(self.bikes.as_ref(), "bike") {
            let Some(bid) = bike.attr("id") else { continue };
            let entry = stats.entry(bid.to_string()).or_default();

            // Inline shape: <maintenance date=".." duration=".." cost=".."/>
            for m in self.locator.find_all(Some(bike), "maintenance") {
                let Some(date) = m.attr("date").and_then(parse_instant) else {
                    continue;
                };
                if in_window(date, start, end) {
                    entry.maintenance_hours +=
                        m.attr("duration").and_then(parse_f64).unwrap_or(0.0);
                    entry.maintenance_cost +=
                        m.attr("cost").and_then(parse_decimal).unwrap_or(Decimal::ZERO);
                }
            }
            // Nested shape: <record><date>..</date><cost>..</cost></record>
            for rec in self.locator.find_all(Some(bike), "record") {
                let Some(date) = self
                    .locator
                    .find_text(Some(rec), "date")
                    .and_then(parse_instant)
                else {
                    continue;
                };
                if in_window(date, start, end) {
                    entry.maintenance_hours += self
                        .locator
                        .find_text(Some(rec), "duration")
                        .and_then(parse_f64)
                        .unwrap_or(24.0);
                    entry.maintenance_cost += self
                        .locator
                        .find_text(Some(rec), "cost")
                        .and_then(parse_decimal)
                        .unwrap_or(Decimal::ZERO);
                }
            }
        }

        for b in self.locator.find_all(self.bookings.as_ref(), "booking") {
            let Some(bid) = b
                .attr("bikeId")
                .or_else(|| self.locator.find_text(Some(b), "bikeRef"))
            else {
                continue;
            };
            let date = b
                .attr("date")
                .or_else(|| self.locator.find_text(Some(b), "date"));
            let begin_ts = self.locator.find_text(Some(b), "begin");
            let end_ts = self.locator.find_text(Some(b), "end");

            if let Some(d) = date {
                // Instant shape: membership in [start, end).
                let Some(d) = parse_instant(d) else { continue };
                if !in_window(d, start, end) {
                    continue;
                }
            } else {
                // Interval shape: strict overlap with [start, end).
                let (Some(bd), Some(ed)) = (
                    begin_ts.and_then(parse_instant),
                    end_ts.and_then(parse_instant),
                ) else {
                    continue;
                };
                if bd >= end || ed <= start {
                    continue;
                }
            }

            let explicit = b
                .attr("duration")
                .or_else(|| self.locator.find_text(Some(b), "duration"))
                .and_then(parse_f64);
            let duration = explicit
                .or_else(|| match (begin_ts, end_ts) {
                    (Some(bs), Some(es)) => {
                        Some(hours_between(parse_instant(bs)?, parse_instant(es)?))
                    }
                    _ => None,
                })
                .unwrap_or(0.0);
            let price = self
                .locator
                .find_text(Some(b), "totalPrice")
                .or_else(|| self.locator.find_text(Some(b), "price"))
                .and_then(parse_decimal)
                .unwrap_or(Decimal::ZERO);

            let entry = stats.entry(bid.to_string()).or_default();
            entry.rental_hours += duration;
            entry.total_revenue += price;
            entry.booking_count += 1;
        }

        for s in stats.values_mut() {
            s.total_hours = s.rental_hours + s.maintenance_hours;
        }
        Ok(stats)
    }

    /// Occupancy percentage per known bike over a trailing window.
    ///
    /// The window ends at the latest resolvable booking end, falling back
    /// to the document's `currentDate` attribute and finally to the wall
    /// clock. Available hours subtract maintenance (per-bike records in the
    /// window plus top-level entries referencing the bike); used hours are
    /// the booking intervals clipped to the window.
    pub fn occupancy_rates(&self, period_days: u32) -> BTreeMap<String, f64> {
        let mut occupancy: BTreeMap<String, f64> = BTreeMap::new();
        if self.bikes.is_none() {
            return occupancy;
        }

        let latest = self
            .locator
            .find_all(self.bookings.as_ref(), "booking")
            .into_iter()
            .filter_map(|b| {
                self.locator
                    .find_text(Some(b), "end")
                    .or_else(|| b.attr("end"))
                    .or_else(|| self.locator.find_text(Some(b), "date"))
                    .or_else(|| b.attr("date"))
                    .and_then(parse_instant)
            })
            .max();
        let end = latest
            .or_else(|| self.root.attr("currentDate").and_then(parse_instant))
            .unwrap_or_else(|| chrono::Local::now().naive_local());
        let start = end - Duration::days(i64::from(period_days));
        let total_hours = f64::from(period_days) * 24.0;

        let mut maint: HashMap<String, f64> = HashMap::new();
        let mut used: HashMap<String, f64> = HashMap::new();

        for bike in self.locator.find_all(self.bikes.as_ref(), "bike") {
            let Some(bid) = bike.attr("id") else { continue };
            occupancy.insert(bid.to_string(), 0.0);
            for m in self.locator.find_all(Some(bike), "maintenance") {
                let Some(date) = m.attr("date").and_then(parse_instant) else {
                    continue;
                };
                if in_window(date, start, end) {
                    *maint.entry(bid.to_string()).or_default() +=
                        m.attr("duration").and_then(parse_f64).unwrap_or(24.0);
                }
            }
        }

        // Top-level maintenance entries reference a bike by id and carry
        // hours under either name.
        for m in self.locator.find_all(self.maintenances.as_ref(), "maintenance") {
            let Some(bike_ref) = self
                .locator
                .find_text(Some(m), "bikeRef")
                .or_else(|| m.attr("bikeRef"))
            else {
                continue;
            };
            let hours = self
                .locator
                .find_text(Some(m), "hours")
                .or_else(|| m.attr("hours"))
                .or_else(|| self.locator.find_text(Some(m), "duration"))
                .or_else(|| m.attr("duration"))
                .and_then(parse_f64);
            if let Some(h) = hours {
                *maint.entry(bike_ref.to_string()).or_default() += h;
            }
        }

        for b in self.locator.find_all(self.bookings.as_ref(), "booking") {
            let Some(bid) = b
                .attr("bikeId")
                .or_else(|| self.locator.find_text(Some(b), "bikeRef"))
            else {
                continue;
            };
            if !occupancy.contains_key(bid) {
                continue;
            }
            let (Some(bd), Some(ed)) = (
                self.locator
                    .find_text(Some(b), "begin")
                    .and_then(parse_instant),
                self.locator
                    .find_text(Some(b), "end")
                    .and_then(parse_instant),
            ) else {
                continue;
            };
            if bd < end && ed > start {
                let s = bd.max(start);
                let e = ed.min(end);
                *used.entry(bid.to_string()).or_default() += hours_between(s, e);
            }
        }

        for (bid, rate) in occupancy.iter_mut() {
            let available = total_hours - maint.get(bid).copied().unwrap_or(0.0);
            *rate = if available > 0.0 {
                (used.get(bid).copied().unwrap_or(0.0) / available * 100.0).min(100.0)
            } else {
                0.0
            };
        }
        occupancy
    }

    /// Per-guide activity over the half-open window `[start, end)`, keyed
    /// by guide id. Every known guide appears, seeded with its cached
    /// language set; revenue follows the document's pricing mode.
    pub fn guide_performance(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BTreeMap<String, GuideStats> {
        let mut stats: BTreeMap<String, GuideStats> = BTreeMap::new();
        if self.guides.is_none() {
            return stats;
        }

        for guide in self.locator.find_all(self.guides.as_ref(), "guide") {
            let Some(gid) = guide.attr("id") else { continue };
            stats.insert(
                gid.to_string(),
                GuideStats {
                    languages: self
                        .guide_languages
                        .get(gid)
                        .cloned()
                        .unwrap_or_default(),
                    ..GuideStats::default()
                },
            );
        }

        if self.trip_groups.is_none() || self.tour_packages.is_none() {
            return stats;
        }

        for group in self.locator.find_all(self.trip_groups.as_ref(), "tripGroup") {
            let Some(trip_date) = self
                .locator
                .find_text(Some(group), "startDate")
                .and_then(parse_instant)
            else {
                continue;
            };
            if !in_window(trip_date, start, end) {
                continue;
            }
            let Some(package_id) = self.locator.find_text(Some(group), "packageRef") else {
                continue;
            };
            let Some(guide_id) = self.guide_for_package(package_id) else {
                continue;
            };

            let participant_count =
                self.locator.find_all(Some(group), "participant").len() as u32;

            let regions = self
                .path_for_package(package_id)
                .map(|path_id| self.regions_for_path(&path_id));
            let price = self
                .locator
                .find_text(self.package_element(package_id), "price")
                .and_then(parse_decimal);

            // Unknown guides (not seeded from the guides section) are skipped.
            let Some(entry) = stats.get_mut(&guide_id) else { continue };
            if let Some(regions) = regions {
                entry.regions.extend(regions);
            }
            if let Some(price) = price {
                entry.revenue_generated += price * self.price_multiplier(participant_count);
            }
            entry.total_tours += 1;
            entry.total_participants += participant_count;
        }

        stats
    }

    /// Per-path popularity, revenue and satisfaction, keyed by path id.
    ///
    /// `period_months` labels the analysis but does not change the
    /// grouping: popular periods are always counted per calendar
    /// year-month of the trip's start date.
    pub fn path_analytics(&self, period_months: u32) -> BTreeMap<String, PathStats> {
        let _ = period_months;
        let mut stats: BTreeMap<String, PathStats> = BTreeMap::new();
        if self.paths.is_none() {
            return stats;
        }

        for path in self.locator.find_all(self.paths.as_ref(), "path") {
            let Some(pid) = path.attr("id") else { continue };
            stats.insert(
                pid.to_string(),
                PathStats {
                    regions: self.regions_for_path(pid),
                    ..PathStats::default()
                },
            );
        }

        let mut ratings_sum: HashMap<String, f64> = HashMap::new();
        let mut ratings_count: HashMap<String, u32> = HashMap::new();
        let mut completed: HashMap<String, u32> = HashMap::new();

        if self.trip_groups.is_some() && self.tour_packages.is_some() {
            for group in self.locator.find_all(self.trip_groups.as_ref(), "tripGroup") {
                let Some(trip_date) = self
                    .locator
                    .find_text(Some(group), "startDate")
                    .and_then(parse_instant)
                else {
                    continue;
                };
                let period_key =
                    format!("{:04}-{:02}", trip_date.year(), trip_date.month());

                let Some(package_id) = self.locator.find_text(Some(group), "packageRef")
                else {
                    continue;
                };
                let Some(path_id) = self.path_for_package(package_id) else {
                    continue;
                };
                let Some(entry) = stats.get_mut(&path_id) else { continue };

                let participant_count =
                    self.locator.find_all(Some(group), "participant").len() as u32;
                entry.total_trips += 1;
                entry.total_participants += participant_count;
                *entry.popular_periods.entry(period_key).or_default() += 1;

                let price = self
                    .locator
                    .find_text(self.package_element(package_id), "price")
                    .and_then(parse_decimal);
                if let Some(price) = price {
                    entry.revenue_generated += price * self.price_multiplier(participant_count);
                }

                for rating in self.locator.find_all(Some(group), "rating") {
                    if let Some(val) = rating.text().and_then(parse_f64) {
                        *ratings_sum.entry(path_id.clone()).or_default() += val;
                        *ratings_count.entry(path_id.clone()).or_default() += 1;
                    }
                }

                if self.locator.find_text(Some(group), "status") == Some("completed") {
                    *completed.entry(path_id.clone()).or_default() += 1;
                }
            }
        }

        for (pid, pstats) in stats.iter_mut() {
            let count = ratings_count.get(pid).copied().unwrap_or(0);
            if count > 0 {
                pstats.avg_satisfaction = ratings_sum[pid] / f64::from(count);
            }
            if pstats.total_trips > 0 {
                pstats.completion_rate = f64::from(completed.get(pid).copied().unwrap_or(0))
                    / f64::from(pstats.total_trips)
                    * 100.0;
            }
        }

        stats
    }

    /// Flat fold of one month's bike utilization plus path analytics.
    pub fn monthly_aggregation(&self, year: i32, month: u32) -> Result<MonthlySummary> {
        let mut summary = MonthlySummary::default();

        for b in self.monthly_bike_stats(year, month)?.values() {
            summary.total_revenue += b.total_revenue;
            summary.total_bookings += b.booking_count;
            summary.total_maintenance_cost += b.maintenance_cost;
            if b.rental_hours > 0.0 {
                summary.bikes_in_service += 1;
            }
        }

        for p in self.path_analytics(1).values() {
            summary.total_revenue += p.revenue_generated;
            summary.total_tours += p.total_trips;
            summary.total_participants += p.total_participants;
        }

        Ok(summary)
    }

    // Package prices apply per participant in exports without a clients
    // section, and per group otherwise.
    fn price_multiplier(&self, participant_count: u32) -> Decimal {
        match self.pricing_mode() {
            PricingMode::PerParticipant => Decimal::from(participant_count),
            PricingMode::PerGroup => Decimal::ONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const FULL_SAMPLE: &str = r#"<CyclingDB xmlns="http://example.com/cycling" currentDate="2024-04-05T00:00:00">
  <bikes>
    <bike id="b1">
      <maintenance date="2024-03-05T08:00:00" duration="6" cost="40.50"/>
      <maintenanceRecords>
        <record><date>2024-03-20T00:00:00</date><cost>10</cost></record>
      </maintenanceRecords>
    </bike>
    <bike id="b2"/>
  </bikes>
  <bookings>
    <booking bikeId="b1">
      <begin>2024-03-10T10:00:00</begin>
      <end>2024-03-10T14:00:00</end>
      <totalPrice>25.50</totalPrice>
    </booking>
    <booking bikeId="b2" date="2024-03-15T09:00:00">
      <duration>3</duration>
      <price>12</price>
    </booking>
    <booking bikeId="b1">
      <begin>2024-02-27T00:00:00</begin>
      <end>2024-03-01T12:00:00</end>
      <price>30</price>
    </booking>
    <booking bikeId="b3">
      <begin>2024-01-01T00:00:00</begin>
      <end>2024-01-02T00:00:00</end>
      <price>99</price>
    </booking>
  </bookings>
  <guides>
    <guide id="g1"><languages><language>en</language></languages></guide>
    <guide id="g2"/>
  </guides>
  <destinations>
    <destination id="d1"><region>Alps</region></destination>
    <destination id="d2"><region>Lakes</region></destination>
  </destinations>
  <paths>
    <path id="p1"><startRef>d1</startRef><endRef>d2</endRef></path>
    <path id="p2"><startRef>d2</startRef><endRef>d2</endRef></path>
  </paths>
  <tourPackages>
    <tourPackage id="tp1">
      <includedPathRef>p1</includedPathRef>
      <assignedGuideRef>g1</assignedGuideRef>
      <price>100</price>
    </tourPackage>
    <tourPackage id="tp2">
      <includedPathRef>p2</includedPathRef>
      <assignedGuideRef>g2</assignedGuideRef>
      <price>55.25</price>
    </tourPackage>
  </tourPackages>
  <tripGroups>
    <tripGroup id="t1">
      <startDate>2024-03-03T09:00:00</startDate>
      <packageRef>tp1</packageRef>
      <participants>
        <participant>c1</participant>
        <participant>c2</participant>
        <participant>c3</participant>
      </participants>
      <ratings><rating>5</rating><rating>4</rating></ratings>
      <status>completed</status>
    </tripGroup>
    <tripGroup id="t2">
      <startDate>2024-03-12T09:00:00</startDate>
      <packageRef>tp1</packageRef>
      <participants><participant>c4</participant></participants>
      <status>cancelled</status>
    </tripGroup>
    <tripGroup id="t3">
      <startDate>2024-02-20T09:00:00</startDate>
      <packageRef>tp1</packageRef>
      <participants><participant>c5</participant></participants>
      <status>completed</status>
    </tripGroup>
    <tripGroup id="t4">
      <startDate>2024-03-25T09:00:00</startDate>
      <packageRef>tp2</packageRef>
      <ratings><rating>3</rating></ratings>
      <status>completed</status>
    </tripGroup>
  </tripGroups>
</CyclingDB>"#;

    fn model() -> CyclingStats {
        CyclingStats::from_xml(FULL_SAMPLE).unwrap()
    }

    fn march() -> (NaiveDateTime, NaiveDateTime) {
        month_window(2024, 3).unwrap()
    }

    #[test]
    fn interval_booking_contributes_exact_duration() {
        let stats = model().monthly_bike_stats(2024, 3).unwrap();
        let b1 = &stats["b1"];
        // 4h from the in-month booking plus 84h from the overlapping one
        // (2024-02-27T00:00 .. 2024-03-01T12:00 in a leap year).
        assert_eq!(b1.rental_hours, 88.0);
        assert_eq!(b1.booking_count, 2);
        assert_eq!(b1.total_revenue, Decimal::new(5550, 2));
    }

    #[test]
    fn instant_booking_inside_window_counts() {
        let stats = model().monthly_bike_stats(2024, 3).unwrap();
        let b2 = &stats["b2"];
        assert_eq!(b2.rental_hours, 3.0);
        assert_eq!(b2.booking_count, 1);
        assert_eq!(b2.total_revenue, Decimal::from(12));
    }

    #[test]
    fn maintenance_accumulates_from_both_shapes() {
        let stats = model().monthly_bike_stats(2024, 3).unwrap();
        let b1 = &stats["b1"];
        // 6h inline plus the record shape's 24h default.
        assert_eq!(b1.maintenance_hours, 30.0);
        assert_eq!(b1.maintenance_cost, Decimal::new(5050, 2));
        assert_eq!(b1.total_hours, b1.rental_hours + b1.maintenance_hours);
    }

    #[test]
    fn unreferenced_bikes_are_absent() {
        let stats = model().monthly_bike_stats(2024, 3).unwrap();
        // b3 is referenced by an out-of-window booking only and has no bike
        // entity; it must not appear.
        assert!(!stats.contains_key("b3"));
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn out_of_window_month_is_empty_activity() {
        let stats = model().monthly_bike_stats(2024, 7).unwrap();
        assert_eq!(stats["b1"], BikeStats::default());
        assert_eq!(stats["b2"], BikeStats::default());
    }

    #[test_case(0; "month zero")]
    #[test_case(13; "month thirteen")]
    fn invalid_month_is_rejected(month: u32) {
        let err = model().monthly_bike_stats(2024, month).unwrap_err();
        assert!(matches!(err, StatsError::InvalidArgument(_)));
    }

    #[test]
    fn occupancy_window_ends_at_latest_booking() {
        let occupancy = model().occupancy_rates(30);
        // Latest resolvable booking timestamp is 2024-03-15T09:00, so the
        // window is [2024-02-14T09:00, 2024-03-15T09:00): b1 is used for
        // 88h with 6h in-window maintenance.
        let expected = 88.0 / (30.0 * 24.0 - 6.0) * 100.0;
        assert!((occupancy["b1"] - expected).abs() < 1e-9);
    }

    #[test]
    fn occupancy_without_activity_is_zero() {
        let occupancy = model().occupancy_rates(30);
        assert_eq!(occupancy["b2"], 0.0);
    }

    #[test]
    fn occupancy_is_capped_at_hundred() {
        let xml = r#"<CyclingDB>
  <bikes><bike id="b1"/></bikes>
  <maintenances>
    <maintenance><bikeRef>b1</bikeRef><hours>700</hours></maintenance>
  </maintenances>
  <bookings>
    <booking bikeId="b1">
      <begin>2024-03-01T00:00:00</begin>
      <end>2024-03-31T00:00:00</end>
    </booking>
  </bookings>
</CyclingDB>"#;
        let model = CyclingStats::from_xml(xml).unwrap();
        let occupancy = model.occupancy_rates(30);
        // 720h booked against 20h available: clamped.
        assert_eq!(occupancy["b1"], 100.0);
    }

    #[test]
    fn occupancy_with_no_available_hours_is_zero() {
        let xml = r#"<CyclingDB currentDate="2024-04-01T00:00:00">
  <bikes><bike id="b1"/></bikes>
  <maintenances>
    <maintenance><bikeRef>b1</bikeRef><hours>800</hours></maintenance>
  </maintenances>
</CyclingDB>"#;
        let model = CyclingStats::from_xml(xml).unwrap();
        assert_eq!(model.occupancy_rates(30)["b1"], 0.0);
    }

    #[test]
    fn guide_performance_over_march() {
        let (start, end) = march();
        let stats = model().guide_performance(start, end);

        let g1 = &stats["g1"];
        assert_eq!(g1.total_tours, 2);
        assert_eq!(g1.total_participants, 4);
        // Per-participant pricing: 100 x 3 + 100 x 1.
        assert_eq!(g1.revenue_generated, Decimal::from(400));
        assert_eq!(g1.regions.iter().collect::<Vec<_>>(), vec!["Alps", "Lakes"]);
        assert_eq!(g1.languages.iter().collect::<Vec<_>>(), vec!["en"]);

        let g2 = &stats["g2"];
        assert_eq!(g2.total_tours, 1);
        assert_eq!(g2.total_participants, 0);
        assert_eq!(g2.revenue_generated, Decimal::ZERO);
        assert!(g2.languages.is_empty());
    }

    #[test]
    fn path_analytics_counts_and_rates() {
        let stats = model().path_analytics(1);

        let p1 = &stats["p1"];
        assert_eq!(p1.total_trips, 3);
        assert_eq!(p1.total_participants, 5);
        assert_eq!(p1.revenue_generated, Decimal::from(500));
        assert_eq!(p1.avg_satisfaction, 4.5);
        assert!((p1.completion_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(p1.popular_periods.get("2024-03"), Some(&2));
        assert_eq!(p1.popular_periods.get("2024-02"), Some(&1));

        let p2 = &stats["p2"];
        assert_eq!(p2.total_trips, 1);
        assert_eq!(p2.avg_satisfaction, 3.0);
        assert_eq!(p2.completion_rate, 100.0);
    }

    #[test]
    fn completion_rate_one_of_four() {
        let xml = r#"<CyclingDB>
  <paths><path id="p1"/></paths>
  <tourPackages>
    <tourPackage id="tp1"><includedPathRef>p1</includedPathRef></tourPackage>
  </tourPackages>
  <tripGroups>
    <tripGroup><startDate>2024-03-01</startDate><packageRef>tp1</packageRef><status>completed</status></tripGroup>
    <tripGroup><startDate>2024-03-02</startDate><packageRef>tp1</packageRef><status>cancelled</status></tripGroup>
    <tripGroup><startDate>2024-03-03</startDate><packageRef>tp1</packageRef><status>scheduled</status></tripGroup>
    <tripGroup><startDate>2024-03-04</startDate><packageRef>tp1</packageRef></tripGroup>
  </tripGroups>
</CyclingDB>"#;
        let model = CyclingStats::from_xml(xml).unwrap();
        let stats = model.path_analytics(1);
        assert_eq!(stats["p1"].completion_rate, 25.0);
    }

    // Revenue is price x participants without a clients section, flat price
    // with one.
    #[test_case(false, Decimal::from(300); "per participant")]
    #[test_case(true, Decimal::from(100); "per group")]
    fn pricing_mode_switch(with_clients: bool, expected: Decimal) {
        let clients = if with_clients { "<clients/>" } else { "" };
        let xml = format!(
            r#"<CyclingDB>
  {clients}
  <guides><guide id="g1"/></guides>
  <paths><path id="p1"/></paths>
  <tourPackages>
    <tourPackage id="tp1">
      <includedPathRef>p1</includedPathRef>
      <assignedGuideRef>g1</assignedGuideRef>
      <price>100</price>
    </tourPackage>
  </tourPackages>
  <tripGroups>
    <tripGroup>
      <startDate>2024-03-01T10:00:00</startDate>
      <packageRef>tp1</packageRef>
      <participants>
        <participant>a</participant>
        <participant>b</participant>
        <participant>c</participant>
      </participants>
    </tripGroup>
  </tripGroups>
</CyclingDB>"#
        );
        let model = CyclingStats::from_xml(&xml).unwrap();

        let (start, end) = march();
        let guides = model.guide_performance(start, end);
        assert_eq!(guides["g1"].revenue_generated, expected);

        let paths = model.path_analytics(1);
        assert_eq!(paths["p1"].revenue_generated, expected);
    }

    #[test]
    fn missing_sections_degrade_to_empty_results() {
        let model = CyclingStats::from_xml("<CyclingDB/>").unwrap();
        assert!(model.monthly_bike_stats(2024, 3).unwrap().is_empty());
        assert!(model.occupancy_rates(30).is_empty());
        let (start, end) = march();
        assert!(model.guide_performance(start, end).is_empty());
        assert!(model.path_analytics(1).is_empty());
        assert_eq!(
            model.monthly_aggregation(2024, 3).unwrap(),
            MonthlySummary::default()
        );
    }

    #[test]
    fn malformed_values_skip_only_their_contribution() {
        let xml = r#"<CyclingDB>
  <bikes>
    <bike id="b1">
      <maintenance date="not-a-date" duration="5" cost="10"/>
      <maintenance date="2024-03-02T00:00:00" duration="2" cost="7"/>
    </bike>
  </bikes>
  <bookings>
    <booking bikeId="b1">
      <begin>2024-03-10T10:00:00</begin>
      <end>2024-03-10T12:00:00</end>
      <price>abc</price>
    </booking>
  </bookings>
</CyclingDB>"#;
        let model = CyclingStats::from_xml(xml).unwrap();
        let stats = model.monthly_bike_stats(2024, 3).unwrap();
        let b1 = &stats["b1"];
        assert_eq!(b1.maintenance_hours, 2.0);
        assert_eq!(b1.maintenance_cost, Decimal::from(7));
        // Unparseable price is treated as absent; the booking still counts.
        assert_eq!(b1.booking_count, 1);
        assert_eq!(b1.rental_hours, 2.0);
        assert_eq!(b1.total_revenue, Decimal::ZERO);
    }

    #[test]
    fn aggregations_are_idempotent() {
        let model = model();
        assert_eq!(
            model.monthly_bike_stats(2024, 3).unwrap(),
            model.monthly_bike_stats(2024, 3).unwrap()
        );
        assert_eq!(model.occupancy_rates(30), model.occupancy_rates(30));
        let (start, end) = march();
        assert_eq!(
            model.guide_performance(start, end),
            model.guide_performance(start, end)
        );
        assert_eq!(model.path_analytics(1), model.path_analytics(1));
    }

    #[test]
    fn monthly_aggregation_folds_bikes_and_paths() {
        let summary = model().monthly_aggregation(2024, 3).unwrap();
        // Bike revenue 67.50 plus path revenue 500 (path analytics is not
        // month-scoped).
        assert_eq!(summary.total_revenue, Decimal::new(56750, 2));
        assert_eq!(summary.total_bookings, 3);
        assert_eq!(summary.total_maintenance_cost, Decimal::new(5050, 2));
        assert_eq!(summary.bikes_in_service, 2);
        assert_eq!(summary.total_tours, 4);
        assert_eq!(summary.total_participants, 5);
    }

    #[test]
    fn parse_instant_accepts_dates_and_datetimes() {
        assert!(parse_instant("2024-03-10").is_some());
        assert!(parse_instant("2024-03-10T14:30").is_some());
        assert!(parse_instant("2024-03-10T14:30:15").is_some());
        assert!(parse_instant("2024-03-10T14:30:15.250").is_some());
        assert!(parse_instant("10/03/2024").is_none());
        assert!(parse_instant("").is_none());
    }
}
