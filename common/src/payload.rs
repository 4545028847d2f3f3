use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload de un job de workflow.
///
/// El campo `error` es el flag reservado de fallo de negocio: un
/// switch sobre el payload en el propio workflow decide con él si
/// transiciona al camino de error. El resto de claves viajan en
/// `extra` sin tocar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default)]
    pub error: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_sin_error_se_deserializa_con_false() {
        let p: JobPayload = serde_json::from_str(r#"{"x": 1}"#).unwrap();
        assert!(!p.error);
        assert_eq!(p.extra.get("x"), Some(&json!(1)));
    }

    #[test]
    fn payload_round_trip_preserva_las_demas_claves() {
        let mut p: JobPayload =
            serde_json::from_str(r#"{"x": 1, "cliente": "acme"}"#).unwrap();
        p.error = false;

        let encoded = serde_json::to_string(&p).unwrap();
        let v: Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(v, json!({"error": false, "x": 1, "cliente": "acme"}));
    }

    #[test]
    fn payload_con_error_explicito_lo_conserva() {
        let p: JobPayload = serde_json::from_str(r#"{"error": true, "x": 2}"#).unwrap();
        assert!(p.error);
        assert_eq!(p.extra.get("x"), Some(&json!(2)));
        // "error" no se duplica dentro de extra
        assert!(p.extra.get("error").is_none());
    }

    #[test]
    fn payload_que_no_es_objeto_falla_al_decodificar() {
        assert!(serde_json::from_str::<JobPayload>("esto no es json").is_err());
        assert!(serde_json::from_str::<JobPayload>("[1, 2, 3]").is_err());
    }
}
