//! Category taxonomies: the builtin construction set and file loaders.
//!
//! Supported files:
//! - JSON object `{"01. Afbraak": ["sloopwerken", ...]}` (keywords may also be a
//!   comma-separated string or a bracketed list literal)
//! - JSON array `[{"id": "...", "keywords": [...]}]`, optionally wrapped as
//!   `{"categories": [...]}`; `summary`/`description` are accepted as aliases
//! - CSV with an `id` (or `category`/`summary`) column and a `keywords` (or
//!   `description`) column

use crate::extract::parse_literal;
use serde_json::Value;
use specsplit_core::{standardize_category_id, CategoryDefinition, Error, Result, Taxonomy};
use std::path::Path;

const BUILTIN: &[(&str, &[&str])] = &[
    (
        "01. Afbraak en Grondwerken",
        &["sloopwerken", "afbraakwerken", "strippen", "puinruiming", "grondverzet", "graafwerken", "uitgraven", "bouwput", "egaliseerwerk", "nivellering", "bouwrijp maken", "ontbossing", "bemaling", "grondstabilisatie", "sleuven graven", "taludvorming"],
    ),
    (
        "02. Funderingen en Kelders",
        &["fundering", "kelderbouw", "betonfundering", "bekisting", "wapening", "paalfundering", "boorpalen", "keldermuren", "keldervloer", "betonstorten", "funderingsplaat", "onderbeton", "funderingstrook", "vorstrand", "drainage rond kelder", "kelderdichting"],
    ),
    (
        "03. Ruwbouw en Betonwerken",
        &["metselwerk", "betonwerken", "ruwbouw", "bekisting", "wapeningsstaal", "dragende muren", "kolommen", "balken", "vloerplaat", "welfsels", "prefab elementen", "lateien", "cellenbeton", "snelbouwsteen", "voegwerk", "betonkolom", "breedplaatvloer", "kalkzandsteen"],
    ),
    (
        "04. Dakwerken",
        &["dakbedekking", "dakpannen", "leien", "roofing", "EPDM", "dakisolatie", "dakstructuur", "daktimmer", "spanten", "gordingen", "dakvenster", "dakgoot", "regenpijp", "nokpannen", "dakdoorvoer", "zinkwerk", "dakkapel", "plat dak"],
    ),
    (
        "05. Buitenschrijnwerk",
        &["ramen", "buitendeuren", "kozijn", "profielen", "dorpels", "beglazing", "dubbel glas", "hang- en sluitwerk", "schuiframen", "garagepoort", "voordeur", "isolatieglas", "raamkader", "deurkozijn", "spouwlat", "ventilatierooster", "slot"],
    ),
    (
        "06. Binnenschrijnwerk en Interieur",
        &["binnendeuren", "plinten", "inbouwkasten", "lambrisering", "vensterbank", "deurlijsten", "scharnieren", "maatwerkmeubilair", "wandbekleding (hout)", "trapbekleding", "omkastingen", "architraaf", "dressing", "boekenkast", "binnenraam", "plafondlijst"],
    ),
    (
        "07. Binnenafwerking - Wanden en Plafonds",
        &["scheidingswanden", "gipskarton", "Metal Stud", "voorzetwanden", "systeemplafond", "verlaagd plafond", "plafondtegels", "akoestisch plafond", "wandprofielen", "plafondprofielen", "brandwerende wand", "gipsplaten", "spouwwand", "plafondrooster"],
    ),
    (
        "08. Pleister- en Bezettingswerken",
        &["pleisterwerk", "bezettingswerk", "gipspleister", "cementering", "bepleistering", "raaplaag", "gladstrijken", "sierpleister", "schuurwerk", "stuccen", "pleisterspaan", "hoekprofielen", "spuitpleister", "gevelpleister", "plamuur"],
    ),
    (
        "09. Vloerbekleding",
        &["vloertegels", "wandtegels", "parket", "laminaat", "tapijt", "vinyl", "linoleum", "gietvloer", "epoxyvloer", "chape", "dekvloer", "egaline", "plinten", "tegelvoegen", "natuursteen vloer", "leefbeton"],
    ),
    (
        "10. Schilder- en Decoratiewerken",
        &["schilderwerk", "verf", "behang", "lakwerk", "vernissen", "muurverf", "grondlaag", "afplakken", "spuitwerk", "borstelen", "schilderstechniek", "latex", "rolleren", "patine", "kleuradvies"],
    ),
    (
        "11. Isolatiewerken",
        &["dakisolatie", "muurisolatie", "vloerisolatie", "glaswol", "rotswol", "PUR-schuim", "PIR-platen", "isolatieplaten", "spouwisolatie", "isolatiedeken", "isolatieschuim", "dampremmende folie", "EPS", "XPS", "na-isolatie"],
    ),
    (
        "12. Sanitair",
        &["waterleidingen", "afvoerleidingen", "kraanwerk", "toilet", "badkuip", "douche", "wastafel", "urinoir", "sifon", "riolering binnenshuis", "sanitair toestel", "koppelingen", "PVC afvoer", "koperleiding", "boiler", "waterverzachter"],
    ),
    (
        "13. Verwarming",
        &["centrale verwarming", "CV-ketel", "radiatoren", "vloerverwarming", "thermostaat", "expansievat", "circulatiepomp", "condenserende ketel", "mazoutketel", "gasketel", "warmtepomp", "zonneboiler", "leidingen", "schouw", "thermostatische kraan"],
    ),
    (
        "14. Ventilatie",
        &["mechanische ventilatie", "balansventilatie", "afzuiging", "toevoerlucht", "afvoerlucht", "ventilatiekanalen", "luchtroosters", "ventilatie-unit", "warmteterugwinning", "filter", "ventilatieplan", "CO2-sensor", "natuurlijke ventilatie", "kanaalwerk"],
    ),
    (
        "15. HVAC",
        &["airconditioning", "klimaatregeling", "koelinstallatie", "luchtbehandeling", "warmtepomp", "koelmachine", "chiller", "compressor", "verdamper", "condensor", "koelmiddel", "VRF-systeem", "luchtgroep", "fan-coil unit", "koelleiding", "koeltoren"],
    ),
    (
        "16. Elektriciteit",
        &["bekabeling", "leidingen", "stopcontacten", "schakelaars", "verdeelbord", "zekeringen", "aardingslus", "differentieel", "verlichting", "armaturen", "kabelgoten", "domotica", "databekabeling", "parlofonie", "meterkast"],
    ),
    (
        "17. Brandbeveiliging",
        &["brandalarm", "rookmelders", "sprinklers", "brandblusser", "brandhaspel", "brandmeldcentrale", "noodverlichting", "handmelder", "RWA-systeem", "branddeur", "brandklep", "branddetectie", "sprinklerpomp", "blusleiding"],
    ),
    (
        "18. Toegangscontrole en Beveiliging",
        &["toegangscontrole", "inbraakalarm", "bewegingsmelder", "camerabewaking", "badgesysteem", "codeklavier", "elektrisch slot", "magneetcontact", "sirene", "parlofoon", "videofoon", "toegangslezer", "alarmcentrale", "toegangspas", "slagboom"],
    ),
    (
        "19. Liften en Verticale Circulatie",
        &["liftinstallatie", "personenlift", "goederenlift", "liftkooi", "liftschacht", "liftmachinekamer", "hydraulische lift", "tractielift", "liftdeur", "liftknop", "roltrap", "plateaulift", "hefvermogen", "nooddaal systeem", "liftkeuring"],
    ),
    (
        "20. Trappen en Leuningen",
        &["trapconstructie", "betontrap", "houten trap", "metalen trap", "trapleuning", "balustrade", "treden", "stootborden", "spiltrap", "wenteltrap", "trapbordes", "leuningsysteem", "antislipstrip", "vide-afscherming", "borstwering"],
    ),
    (
        "21. Zonwering en Raamdecoratie",
        &["rolluiken", "zonnescherm", "jaloezieën", "lamellen", "gordijnen", "rolgordijn", "plisségordijn", "screens", "markies", "verduistering", "zonwerende folie", "vliegenraam", "paneelgordijn", "overgordijnen"],
    ),
    (
        "22. Buitenaanleg en Tuinaanleg",
        &["bestrating", "klinkers", "terrasaanleg", "oprit", "asfalt", "grindpad", "boordstenen", "tuinafwerking", "gazon", "beplanting", "tuinomheining", "tuinpoort", "sierbestrating", "vijveraanleg", "speeltuigen", "drainage"],
    ),
    (
        "23. Riolering en Waterbeheer",
        &["rioleringsbuizen", "inspectieput", "septische put", "regenwaterput", "infiltratiekratten", "afvoergoot", "drainage", "kolken", "pompput", "rioolpomp", "bufferbekken", "overstort", "afkoppeling", "DWA/RWA scheiding", "waterzuivering"],
    ),
    (
        "24. Glas en Aluminiumconstructies",
        &["vliesgevel", "aluminium ramen", "gevelbekleding (alu)", "gordijngevel", "dubbel glas", "gelaagd glas", "gehard glas", "profielsysteem", "thermische onderbreking", "structurele beglazing", "siliconevoeg", "beglazingsrubbers", "glasgevel", "lichtstraat", "paneelvulling"],
    ),
    (
        "25. Reiniging en Oplevering",
        &["bouwschoonmaak", "opleveringsschoonmaak", "puinopruiming", "stofzuigen", "ramen wassen", "opleveringsklaar", "afvalafvoer", "eindschoonmaak", "opleveringsinspectie", "schuurmiddel", "reinigen", "kuisen", "stofvrij maken", "ontvetten"],
    ),
    (
        "26. Keukens",
        &["keukenplaatsing", "keukenkasten", "werkblad", "spoelbak", "mengkraan", "kookplaat", "oven", "koelkast", "vaatwasser", "dampkap", "keukeneiland", "inbouwapparatuur", "keukenfronten", "lade", "scharnieren", "spatwand"],
    ),
    (
        "27. Laboinrichting",
        &["laboratoriummeubilair", "zuurkast", "veiligheidskast", "labotafel", "werkblad (chemisch resistent)", "nooddouche", "oogdouche", "gasvoorziening", "afzuigarm", "laboratoriumkraan", "spoelbak (lab)", "laminaire kast", "reagentiekast", "labostoelen", "labofauteuil"],
    ),
    (
        "28. Sportinfrastructuur",
        &["sportvloer", "belijning", "tribune", "basketbalring", "voetbaldoelen", "volleybalnet", "turntoestellen", "klimrek", "kunstgrasveld", "scorebord", "kleedkamerbanken", "gymmatten", "doelnetten", "pannaveld", "hockeyveld"],
    ),
    (
        "29. Signalisatie en Bewegwijzering",
        &["bewegwijzering", "pictogrammen", "nooduitgangbord", "informatiebord", "verkeersbord", "parkeerborden", "richtingaanwijzers", "naambordjes", "waarschuwingsbord", "vloermarkering", "veiligheidssignalisatie", "LED-borden", "straatnaambord", "signalisatiekegel"],
    ),
    (
        "30. Waterdichting",
        &["kelderdichting", "waterkering", "bitumenmembraan", "EPDM-folie", "afdichtingsband", "zwelband", "vochtisolatie", "lekwaterinjectie", "bekuiping", "dampscherm", "waterproof coating", "voegdichting", "bitumineuze verankering", "scheuroverbrugging"],
    ),
    (
        "31. Meubilair en Inrichting",
        &["stoelen", "tafels", "kasten", "bedden", "banken (zitbanken)", "bureaus", "fauteuils", "lampen", "decoratie", "planken en rekken", "salontafel", "wandkast", "garderobe", "nachttafel", "kastenwand"],
    ),
    (
        "32. Bliksembeveiliging",
        &["bliksemafleider", "aardingslus", "aardpen", "overspanningsbeveiliging", "dakgeleider", "aardingsnet", "Faraday-kooi", "spanningsafleider", "aardklem", "blikseminslag", "potentiaalvereffening"],
    ),
    (
        "33. Advies en Studies",
        &["stabiliteitsstudie", "EPB-verslaggeving", "bodemonderzoek", "sondering", "veiligheidscoördinatie", "akoestische studie", "energieberekening", "asbestinventaris", "meetstaat", "lastenboek", "werfcontrole", "expertise", "studiebureau", "constructieberekening", "ontwerptekeningen"],
    ),
    (
        "34. Steigerbouw en Schoringen",
        &["steiger", "rolsteiger", "gevelsteiger", "steigerplank", "steigerbuis", "steigerklem", "hangsteiger", "veiligheidsnet", "valbeveiliging", "schoring", "stutwerk", "stempel", "onderstempeling", "schoorbalk", "steigerconstructie"],
    ),
    (
        "35. Panelen en Beplating",
        &["sandwichpanelen", "gevelbeplating", "wandpanelen", "dakpanelen", "trespa platen", "HPL platen", "golfplaten", "damwandprofiel", "sidings", "aluminium composietpanelen", "polycarbonaat platen", "steeldeck", "zetwerk", "gevelcassette", "isolatiepaneel"],
    ),
    (
        "36. Asbestverwijdering en Milieuwerken",
        &["asbestinventaris", "asbestverwijdering", "asbestsanering", "hechtgebonden asbest", "losgebonden asbest", "containment", "negatieve druk", "bodemsanering", "verontreinigde grond", "grondwatersanering", "milieusanering", "bodemvervuiling", "tankreiniging", "afvalverwerking", "decontaminatie"],
    ),
    (
        "38. Advies en Studies",
        &["stabiliteitsstudie", "EPB-verslaggeving", "bodemonderzoek", "sondering", "veiligheidscoördinatie", "akoestische studie", "energieberekening", "asbestinventaris", "meetstaat", "lastenboek", "werfcontrole", "expertise", "studiebureau", "constructieberekening", "ontwerptekeningen"],
    ),
    (
        "39. Steigerbouw en Schoringen",
        &["steiger", "rolsteiger", "gevelsteiger", "steigerplank", "steigerbuis", "steigerklem", "hangsteiger", "veiligheidsnet", "valbeveiliging", "schoring", "stutwerk", "stempel", "onderstempeling", "schoorbalk", "steigerconstructie"],
    ),
    (
        "42. Asbestverwijdering en Milieuwerken",
        &["asbestinventaris", "asbestverwijdering", "asbestsanering", "hechtgebonden asbest", "losgebonden asbest", "containment", "negatieve druk", "bodemsanering", "verontreinigde grond", "grondwatersanering", "milieusanering", "bodemvervuiling", "tankreiniging", "afvalverwerking", "decontaminatie"],
    ),
    (
        "99. Overige",
        &["diverse", "algemeen", "overige werkzaamheden", "diversen", "restposten"],
    ),
];

/// The default construction taxonomy, numbered to line up with the VMSW table.
pub fn builtin_taxonomy() -> Taxonomy {
    let defs = BUILTIN
        .iter()
        .map(|(id, kws)| CategoryDefinition::new(*id, kws.iter().map(|k| k.to_string()).collect()))
        .collect();
    match Taxonomy::new(defs) {
        Ok(t) => t,
        Err(e) => unreachable!("builtin taxonomy is valid: {e}"),
    }
}

pub fn load_taxonomy(path: &Path) -> Result<Taxonomy> {
    let bytes =
        std::fs::read(path).map_err(|e| Error::Taxonomy(format!("{}: {e}", path.display())))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let taxonomy = match ext.as_deref() {
        Some("csv") => parse_taxonomy_csv(bytes.as_slice())?,
        Some("json") => parse_taxonomy_json(&parse_json(&bytes)?)?,
        _ => match serde_json::from_slice::<Value>(&bytes) {
            Ok(v) => parse_taxonomy_json(&v)?,
            Err(_) => parse_taxonomy_csv(bytes.as_slice())?,
        },
    };
    tracing::info!(
        path = %path.display(),
        categories = taxonomy.len(),
        "loaded category taxonomy"
    );
    Ok(taxonomy)
}

fn parse_json(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| Error::Taxonomy(format!("invalid json: {e}")))
}

pub fn parse_taxonomy_json(v: &Value) -> Result<Taxonomy> {
    let defs = match v {
        Value::Object(m) => match m.get("categories") {
            Some(Value::Array(items)) => defs_from_array(items)?,
            _ => m
                .iter()
                .map(|(id, kws)| Ok(definition(id, keywords_from_value(kws)?)))
                .collect::<Result<Vec<_>>>()?,
        },
        Value::Array(items) => defs_from_array(items)?,
        _ => {
            return Err(Error::Taxonomy(
                "expected a JSON object or array of categories".to_string(),
            ))
        }
    };
    Taxonomy::new(defs)
}

fn defs_from_array(items: &[Value]) -> Result<Vec<CategoryDefinition>> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let id = ["id", "category", "summary"]
                .iter()
                .find_map(|k| item.get(k).and_then(|v| v.as_str()))
                .ok_or_else(|| Error::Taxonomy(format!("category #{i} has no id")))?;
            let kws = ["keywords", "description"]
                .iter()
                .find_map(|k| item.get(k))
                .map(keywords_from_value)
                .transpose()?
                .unwrap_or_default();
            Ok(definition(id, kws))
        })
        .collect()
}

fn definition(id: &str, keywords: Vec<String>) -> CategoryDefinition {
    CategoryDefinition::new(standardize_category_id(id), keywords)
}

fn keywords_from_value(v: &Value) -> Result<Vec<String>> {
    match v {
        Value::Array(items) => Ok(items
            .iter()
            .filter_map(|k| match k {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect()),
        Value::String(s) => Ok(keywords_from_str(s)),
        Value::Null => Ok(Vec::new()),
        other => Err(Error::Taxonomy(format!(
            "keywords must be a list or string, got {other}"
        ))),
    }
}

/// Splits a keyword cell. Accepts `['a', 'b']` list literals, `a; b` and `a, b`.
pub fn keywords_from_str(s: &str) -> Vec<String> {
    let t = s.trim();
    if t.starts_with('[') && t.ends_with(']') {
        if let Ok(Value::Array(items)) = parse_literal(t) {
            return items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
    }
    let sep = if t.contains(';') { ';' } else { ',' };
    t.split(sep)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

pub fn parse_taxonomy_csv<R: std::io::Read>(reader: R) -> Result<Taxonomy> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| Error::Taxonomy(format!("csv header: {e}")))?
        .clone();
    let col = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let id_col = col(&["id", "category", "summary"])
        .ok_or_else(|| Error::Taxonomy("csv has no id/category column".to_string()))?;
    let kw_col = col(&["keywords", "description"]);

    let mut defs = Vec::new();
    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| Error::Taxonomy(format!("csv row {}: {e}", i + 1)))?;
        let Some(id) = rec.get(id_col).filter(|s| !s.is_empty()) else {
            continue;
        };
        let kws = kw_col
            .and_then(|c| rec.get(c))
            .map(keywords_from_str)
            .unwrap_or_default();
        defs.push(definition(id, kws));
    }
    Taxonomy::new(defs)
}
