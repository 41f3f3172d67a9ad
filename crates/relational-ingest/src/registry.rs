//! Built-in dataset definitions.
//!
//! Every entry is plain configuration: a database on the public CTU
//! relational server, its temporal columns, the key retention flag, its
//! post-processing steps and its split timestamps.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::config::{ConnectionConfig, DatasetConfig, SplitTimestamps};
use crate::error::{IngestError, Result};
use crate::postprocess::{midnight, Rename, Step};

/// Public CTU relational server.
pub const CTU_HOST: &str = "relational.fel.cvut.cz";
pub const CTU_PORT: u16 = 3306;
pub const CTU_USER: &str = "guest";
pub const CTU_PASSWORD: &str = "ctu-relational";

const BUILTIN: &[&str] = &[
    "ctu-accidents",
    "ctu-airline",
    "ctu-employee",
    "ctu-expenditures",
    "ctu-legalacts",
    "ctu-seznam",
    "ctu-tpcc",
    "ctu-tpcd",
    "ctu-tpcds",
    "ctu-tpch",
    "ctu-voc",
    "ctu-walmart",
];

/// Names accepted by [`builtin`].
pub fn names() -> &'static [&'static str] {
    BUILTIN
}

/// Configuration for any database on the CTU server, with no temporal
/// columns or post-processing.
pub fn ctu(database: &str) -> DatasetConfig {
    DatasetConfig::new(ConnectionConfig {
        dialect: "mariadb".into(),
        driver: Some("mysqlconnector".into()),
        host: CTU_HOST.into(),
        port: Some(CTU_PORT),
        user: CTU_USER.into(),
        password: CTU_PASSWORD.into(),
        database: database.into(),
        ..Default::default()
    })
}

/// Look up a built-in dataset by name.
pub fn builtin(name: &str) -> Result<DatasetConfig> {
    let config = match name {
        "ctu-accidents" => ctu("Accidents")
            .time_cols([("nesreca", "cas_nesreca")])
            .splits((2003, 1, 1), (2005, 1, 1)),

        "ctu-airline" => ctu("Airline")
            .time_cols([("On_Time_On_Time_Performance_2016_1", "FlightDate")])
            .splits((2016, 1, 18), (2016, 1, 25)),

        "ctu-expenditures" => ctu("ConsumerExpenditures"),

        "ctu-employee" => ctu("employee")
            .time_cols([
                ("dept_emp", "from_date"),
                ("dept_manager", "from_date"),
                ("employees", "hire_date"),
                ("salaries", "from_date"),
                ("titles", "from_date"),
            ])
            .keep_keys()
            .steps(
                [
                    drop_columns("titles", &["emp_no"]),
                    drop_columns("dept_manager", &["emp_no", "dept_no"]),
                    drop_columns("departments", &["dept_no"]),
                    drop_columns("salaries", &["emp_no"]),
                    drop_columns("dept_emp", &["emp_no", "dept_no"]),
                    drop_columns("employees", &["emp_no"]),
                ]
                .into_iter()
                .chain(
                    ["titles", "dept_manager", "salaries", "dept_emp"]
                        .into_iter()
                        .map(|table| Step::ParseDatetime {
                            table: table.into(),
                            columns: vec!["to_date".into()],
                        }),
                ),
            )
            .splits((1998, 2, 1), (2000, 5, 1)),

        "ctu-legalacts" => ctu("legalActs")
            .time_cols([("legalacts", "StartDate")])
            .steps([Step::DropTables {
                tables: vec!["scrapefix".into()],
            }])
            .splits((2011, 8, 1), (2012, 3, 1)),

        "ctu-seznam" => ctu("Seznam")
            .time_cols([
                ("dobito", "month_year_datum_transakce"),
                ("probehnuto", "month_year_datum_transakce"),
                ("probehnuto_mimo_penezenku", "Month/Year"),
            ])
            .splits((2014, 12, 1), (2015, 5, 1)),

        "ctu-tpcc" => ctu("tpcc")
            .time_cols([("dss_lineitem", "l_shipdate"), ("dss_order", "o_orderdate")])
            .keep_keys()
            .splits((1996, 1, 1), (1997, 5, 1)),

        "ctu-tpcd" => ctu("tpcd")
            .time_cols([("dss_lineitem", "l_shipdate"), ("dss_order", "o_orderdate")])
            .keep_keys()
            .steps([
                Step::AddForeignKey {
                    table: "dss_partsupp".into(),
                    columns: vec!["ps_partkey".into()],
                    ref_table: "dss_part".into(),
                    ref_columns: vec!["p_partkey".into()],
                },
                drop_columns("dss_lineitem", &["l_orderkey"]),
                drop_columns("dss_part", &["p_partkey"]),
                drop_columns("dss_partsupp", &["ps_partkey", "ps_suppkey"]),
                drop_columns("dss_region", &["r_regionkey"]),
                drop_columns("dss_nation", &["n_nationkey", "n_regionkey"]),
                drop_columns("dss_customer", &["c_custkey", "c_nationkey"]),
                drop_columns("dss_supplier", &["s_suppkey", "s_nationkey"]),
                drop_columns("dss_order", &["o_orderkey", "o_custkey"]),
            ])
            .splits((1996, 1, 1), (1997, 5, 1)),

        "ctu-tpcds" => ctu("tpcds")
            .time_cols([
                ("call_center", "cc_open_date_sk"),
                ("catalog_page", "cp_start_date_sk"),
                ("catalog_sales", "cs_ship_date_sk"),
                ("customer", "c_first_sales_date_sk"),
                ("inventory", "inv_date_sk"),
                ("item", "i_rec_start_date"),
                ("promotion", "p_start_date_sk"),
                ("store", "s_rec_start_date"),
                ("store_returns", "sr_returned_date_sk"),
                ("web_page", "wp_creation_date_sk"),
                ("web_sales", "ws_ship_date_sk"),
                ("web_site", "web_open_date_sk"),
            ])
            .steps([
                Step::CombineDuration {
                    table: "time_dim".into(),
                    hours: "t_hour".into(),
                    minutes: "t_minute".into(),
                    seconds: "t_second".into(),
                    into: "time_delta".into(),
                },
                Step::InlineReference {
                    ref_table: "date_dim".into(),
                    value_column: "d_date".into(),
                    prefix: "FK_date_dim_".into(),
                    rename: None,
                },
                Step::InlineReference {
                    ref_table: "time_dim".into(),
                    value_column: "time_delta".into(),
                    prefix: "FK_time_dim_".into(),
                    rename: Some(Rename {
                        from: "time".into(),
                        to: "date".into(),
                    }),
                },
                Step::DropTables {
                    tables: vec!["time_dim".into(), "date_dim".into()],
                },
            ])
            .splits((1999, 5, 1), (2001, 5, 1)),

        "ctu-tpch" => ctu("tpch")
            .time_cols([("lineitem", "l_shipdate"), ("orders", "o_orderdate")])
            .keep_keys()
            .steps([
                drop_columns("lineitem", &["l_orderkey", "l_partkey", "l_suppkey"]),
                drop_columns("part", &["p_partkey"]),
                drop_columns("partsupp", &["ps_partkey", "ps_suppkey"]),
                drop_columns("region", &["r_regionkey"]),
                drop_columns("nation", &["n_nationkey", "n_regionkey"]),
                drop_columns("customer", &["c_custkey", "c_nationkey"]),
                drop_columns("supplier", &["s_suppkey", "s_nationkey"]),
                drop_columns("orders", &["o_orderkey", "o_custkey"]),
            ])
            .splits((1996, 1, 1), (1997, 5, 1)),

        "ctu-voc" => ctu("voc")
            .time_cols([("voyages", "departure_date")])
            .steps([Step::ShiftYears {
                table: "voyages".into(),
                columns: ["departure_date", "arrival_date", "cape_departure", "cape_arrival"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                years: 100,
                min_year: 1678,
            }])
            .splits((1837, 1, 1), (1867, 1, 1)),

        "ctu-walmart" => ctu("Walmart")
            .time_cols([("weather", "date")])
            .keep_keys()
            .steps([Step::AddEpochOffset {
                table: "weather".into(),
                columns: vec!["sunrise".into(), "sunset".into()],
                origin: NaiveDate::from_ymd_opt(1970, 1, 1)
                    .ok_or_else(|| IngestError::Config("invalid epoch origin".into()))?,
            }])
            .splits((2013, 9, 1), (2014, 4, 1)),

        other => return Err(IngestError::UnknownDataset(other.to_string())),
    };
    Ok(config)
}

fn drop_columns(table: &str, columns: &[&str]) -> Step {
    Step::DropColumns {
        table: table.into(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
    }
}

/// Builder-style helpers used by the registry entries.
trait DatasetConfigExt {
    fn time_cols<const N: usize>(self, cols: [(&str, &str); N]) -> Self;
    fn keep_keys(self) -> Self;
    fn steps(self, steps: impl IntoIterator<Item = Step>) -> Self;
    fn splits(self, val: (i32, u32, u32), test: (i32, u32, u32)) -> Self;
}

impl DatasetConfigExt for DatasetConfig {
    fn time_cols<const N: usize>(mut self, cols: [(&str, &str); N]) -> Self {
        self.time_col_dict = cols
            .into_iter()
            .map(|(t, c)| (t.to_string(), c.to_string()))
            .collect::<BTreeMap<_, _>>();
        self
    }

    fn keep_keys(mut self) -> Self {
        self.keep_original_keys = true;
        self
    }

    fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.post_process.extend(steps);
        self
    }

    fn splits(mut self, val: (i32, u32, u32), test: (i32, u32, u32)) -> Self {
        let at = |(y, m, d): (i32, u32, u32)| NaiveDate::from_ymd_opt(y, m, d).and_then(midnight);
        self.splits = match (at(val), at(test)) {
            (Some(val_timestamp), Some(test_timestamp)) => Some(SplitTimestamps {
                val_timestamp,
                test_timestamp,
            }),
            _ => None,
        };
        self
    }
}
